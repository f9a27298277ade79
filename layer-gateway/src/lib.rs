//! # layer-gateway
//!
//! Multi-account session lifecycle for Telegram REST gateways, built on
//! [`layer_client`].
//!
//! ## Features
//! - Three-step login state machine: phone → code → optional 2FA password
//! - One live client per phone number, torn down on every exit path
//! - Durable credential store (JSON file, atomic rewrite, legacy migration)
//! - Opaque session blobs validated against the layer-client session format
//! - Contact search, global chat/message search with deep links
//! - Batched message forwarding with per-message correlation ids
//!
//! ## Flow
//!
//! ```rust,no_run
//! # async fn f() -> Result<(), layer_gateway::GatewayError> {
//! use std::sync::Arc;
//! use layer_gateway::{
//!     AppCredentials, CodeOutcome, JsonFileStore, LayerClientFactory, PhoneNumber,
//!     SessionManager, StartOutcome,
//! };
//!
//! let app     = AppCredentials::new(12345, "0123456789abcdef");
//! let manager = SessionManager::open(
//!     Arc::new(LayerClientFactory::default()),
//!     Arc::new(JsonFileStore::new("sessions/sessions.json")),
//! ).await?;
//!
//! let phone = PhoneNumber::parse("+1 555-123-4567")?;
//! if let StartOutcome::CodeSent { phone_code_hash } = manager.start_auth(&phone, &app).await? {
//!     match manager.verify_code(&phone, "12345", &phone_code_hash).await? {
//!         CodeOutcome::Success          => {}
//!         CodeOutcome::PasswordRequired => { manager.verify_password(&phone, "hunter2").await?; }
//!     }
//! }
//!
//! let lease = manager.get_client(&phone, &app).await?;
//! let me    = lease.client().get_me().await?;
//! println!("signed in as {}", me.user_id);
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod forward;
pub mod links;
pub mod manager;
pub mod phone;
pub mod protocol;
pub mod search;
pub mod store;
pub mod telegram;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use errors::{ErrorKind, GatewayError, ProtocolError, StoreError, ValidationError};
pub use manager::{
    AccountInfo, AuthState, ClientLease, CodeOutcome, SessionInfo, SessionManager, StartOutcome,
};
pub use phone::PhoneNumber;
pub use protocol::{
    AppCredentials, AuthOutcome, ChatKind, ChatRef, ClientFactory, ForwardBatch, GlobalSearchPage,
    Identity, ProtocolClient, RemoteChat, RemoteMessage, RemoteUser,
};
pub use store::{CredentialStore, InMemoryStore, JsonFileStore, SessionBlob, SessionMap, SessionRecord};
pub use telegram::LayerClientFactory;
