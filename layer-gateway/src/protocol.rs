//! The protocol-client capability the session manager drives.
//!
//! [`ProtocolClient`] is an opaque, connected client for one phone number:
//! connect/authenticate/invoke/export-session, nothing about the wire format.
//! [`ClientFactory`] builds connected clients and owns session-blob
//! validation, which is specific to whichever client implementation it wraps.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, ProtocolError};
use crate::phone::PhoneNumber;
use crate::store::SessionBlob;

// ─── App credentials ──────────────────────────────────────────────────────────

/// Telegram application credentials (`api_id` / `api_hash`).
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id:     i32,
    pub app_secret: String,
}

impl AppCredentials {
    pub fn new(app_id: i32, app_secret: impl Into<String>) -> Self {
        Self { app_id, app_secret: app_secret.into() }
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppCredentials {{ app_id: {}, app_secret: <redacted> }}", self.app_id)
    }
}

// ─── Auth outcomes ────────────────────────────────────────────────────────────

/// Result of a sign-in or 2FA step, decided by the protocol binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    /// The account has 2FA enabled; a password check must follow.
    PasswordRequired,
    /// The code was wrong, expired, empty, or not bound to the last send.
    InvalidCode,
    InvalidPassword,
    RateLimited { seconds: u64 },
    ConnectionError(String),
    /// Any other refusal (unregistered number, unexpected RPC error, …).
    Rejected(String),
}

/// The signed-in account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id:  i64,
    pub username: Option<String>,
}

// ─── Remote entities ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteUser {
    pub id:         i64,
    pub first_name: Option<String>,
    pub last_name:  Option<String>,
    pub username:   Option<String>,
    /// As reported by Telegram: digits, no `+`.
    pub phone:      Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

impl ChatKind {
    /// Classify a chat the way Telegram clients display it: broadcast
    /// channels are channels, megagroups/gigagroups and basic groups are
    /// groups, users are private chats.
    pub fn classify(is_user: bool, broadcast: bool, megagroup: bool, gigagroup: bool) -> Self {
        if is_user {
            Self::Private
        } else if broadcast && !megagroup && !gigagroup {
            Self::Channel
        } else {
            Self::Group
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteChat {
    pub id:       i64,
    pub kind:     ChatKind,
    pub title:    Option<String>,
    pub username: Option<String>,
    /// Participant count when the provider includes it.
    pub members:  Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id:        i32,
    /// Id of the owning chat (user, basic group or channel id).
    pub chat_id:   i64,
    pub text:      Option<String>,
    pub date:      Option<DateTime<Utc>>,
    pub from_user: Option<i64>,
}

/// One page of `messages.searchGlobal`; `chats` covers users too.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalSearchPage {
    pub messages: Vec<RemoteMessage>,
    pub chats:    Vec<RemoteChat>,
}

/// A chat addressed by public username or numeric id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatRef {
    Username(String),
    Id(i64),
}

impl ChatRef {
    /// `"@name"`, `"name"` and numeric strings are all accepted.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Username(raw.trim_start_matches('@').to_string()),
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username(u) => write!(f, "@{u}"),
            Self::Id(id)      => write!(f, "{id}"),
        }
    }
}

/// A single batched `messages.forwardMessages` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardBatch {
    pub from:         ChatRef,
    pub to:           ChatRef,
    pub message_ids:  Vec<i32>,
    /// One correlation id per entry of `message_ids`.
    pub random_ids:   Vec<i64>,
    pub drop_author:  bool,
    pub drop_captions: bool,
    pub noforwards:   bool,
    pub silent:       bool,
}

// ─── Traits ───────────────────────────────────────────────────────────────────

/// A connected protocol client bound to one phone number.
///
/// Dropping the last handle closes the connection.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Whether the remote side already considers this session signed in.
    async fn is_authorized(&self) -> Result<bool, ProtocolError>;

    /// Request a login code; returns the phone-code hash the caller must echo.
    async fn send_code(&self, phone: &PhoneNumber) -> Result<String, ProtocolError>;

    async fn sign_in(&self, phone: &PhoneNumber, phone_code_hash: &str, code: &str) -> AuthOutcome;

    async fn check_password(&self, password: &str) -> AuthOutcome;

    async fn get_me(&self) -> Result<Identity, ProtocolError>;

    /// Serialize the current credentials into an opaque blob.
    async fn export_session(&self) -> Result<SessionBlob, ProtocolError>;

    /// The account's full contact list.
    async fn contacts(&self) -> Result<Vec<RemoteUser>, ProtocolError>;

    /// Remote keyword search over users.
    async fn search_contacts(&self, query: &str, limit: usize) -> Result<Vec<RemoteUser>, ProtocolError>;

    async fn search_global(&self, query: &str, limit: usize) -> Result<GlobalSearchPage, ProtocolError>;

    async fn join_chat(&self, chat: &ChatRef) -> Result<(), ProtocolError>;

    /// Forward a batch; returns the ids of the newly created messages.
    async fn forward_messages(&self, batch: &ForwardBatch) -> Result<Vec<i32>, ProtocolError>;
}

/// Builds connected [`ProtocolClient`]s.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Structural validation of a session blob for this client implementation.
    ///
    /// Says nothing about whether Telegram will still accept it.
    fn validate_session(&self, blob: &str) -> Result<SessionBlob, GatewayError>;

    /// Construct and connect a client. With `session` the client resumes
    /// those credentials; without it, it starts unauthenticated.
    ///
    /// Fails with [`GatewayError::InvalidSessionBlob`] or
    /// [`GatewayError::ConnectionFailed`].
    async fn create(
        &self,
        phone:   &PhoneNumber,
        app:     &AppCredentials,
        session: Option<&SessionBlob>,
    ) -> Result<Arc<dyn ProtocolClient>, GatewayError>;
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_classification() {
        assert_eq!(ChatKind::classify(true, false, false, false), ChatKind::Private);
        assert_eq!(ChatKind::classify(false, true, false, false), ChatKind::Channel);
        assert_eq!(ChatKind::classify(false, false, true, false), ChatKind::Group);
        assert_eq!(ChatKind::classify(false, true, false, true), ChatKind::Group);
        assert_eq!(ChatKind::classify(false, false, false, false), ChatKind::Group);
    }

    #[test]
    fn chat_refs() {
        assert_eq!(ChatRef::parse("@durov"), ChatRef::Username("durov".into()));
        assert_eq!(ChatRef::parse("durov"), ChatRef::Username("durov".into()));
        assert_eq!(ChatRef::parse("-1001234"), ChatRef::Id(-1001234));
        assert_eq!(ChatRef::Id(5).to_string(), "5");
        assert_eq!(ChatRef::Username("x".into()).to_string(), "@x");
    }

    #[test]
    fn secret_is_redacted() {
        let app = AppCredentials::new(7, "very-secret");
        assert!(!format!("{app:?}").contains("very-secret"));
    }
}
