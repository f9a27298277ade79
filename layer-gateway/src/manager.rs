//! The session manager: login state machine, live-client ownership and
//! credential persistence for every phone number.
//!
//! ```text
//! NoSession ──start_auth──▶ PendingCode ──verify_code──▶ Authenticated
//!                               │                            ▲
//!                               └──(2FA)──▶ PendingPassword ─┘ verify_password
//! ```
//!
//! At most one live client exists per phone number. Every operation on a
//! phone number holds that number's async lock, so overlapping calls for one
//! number run one after another while different numbers proceed in parallel.
//! A [`ClientLease`] keeps the lock until it is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::errors::{GatewayError, ValidationError};
use crate::phone::PhoneNumber;
use crate::protocol::{AppCredentials, AuthOutcome, ClientFactory, ProtocolClient};
use crate::store::{CredentialStore, SessionMap, SessionRecord};
use crate::validation;

// ─── Public types ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A login code was sent; echo `phone_code_hash` to [`SessionManager::verify_code`].
    CodeSent { phone_code_hash: String },
    AlreadyAuthorized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeOutcome {
    Success,
    /// 2FA is enabled; call [`SessionManager::verify_password`] next.
    PasswordRequired,
}

/// Where a phone number is in the login flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    NoSession,
    PendingCode,
    PendingPassword,
    Authenticated,
}

/// Public view of a completed session. Never carries the blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub phone_number: PhoneNumber,
    pub user_id:      i64,
    pub username:     Option<String>,
}

/// Live account details fetched with the stored session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub phone_number:  PhoneNumber,
    pub user_id:       i64,
    pub username:      Option<String>,
    pub is_authorized: bool,
}

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    PendingCode,
    PendingPassword,
    Leased,
}

struct LiveClient {
    client: Arc<dyn ProtocolClient>,
    stage:  Stage,
}

#[derive(Default)]
struct State {
    records: SessionMap,
    live:    HashMap<PhoneNumber, LiveClient>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    locks: Mutex<HashMap<PhoneNumber, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<PhoneNumber, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the live client for `phone`. Dropping the returned handle
    /// closes its connection once no lease refers to it.
    fn take_live(&self, phone: &PhoneNumber) -> Option<Arc<dyn ProtocolClient>> {
        let removed = self.state().live.remove(phone);
        if removed.is_some() {
            tracing::debug!(%phone, "[manager] live client torn down");
        }
        removed.map(|l| l.client)
    }
}

// ─── Phone lock ───────────────────────────────────────────────────────────────

/// Exclusive hold on one phone number.
///
/// Dropping it releases the lock and forgets the entry when no other caller
/// holds or awaits it, so the lock table only tracks numbers in use.
struct PhoneGuard {
    guard:  Option<OwnedMutexGuard<()>>,
    phone:  PhoneNumber,
    shared: Arc<Shared>,
}

impl Drop for PhoneGuard {
    fn drop(&mut self) {
        // Waiters clone the entry under this mutex, so the count cannot grow
        // while it is held.
        let mut locks = self.shared.locks();
        drop(self.guard.take());
        if locks.get(&self.phone).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.phone);
        }
    }
}

// ─── Lease ────────────────────────────────────────────────────────────────────

/// A connected client for one request.
///
/// Holds the phone number's lock; dropping the lease (on success, error or
/// cancellation alike) deregisters the client and closes its connection.
pub struct ClientLease {
    phone:  PhoneNumber,
    client: Arc<dyn ProtocolClient>,
    shared: Arc<Shared>,
    _guard: PhoneGuard,
}

impl ClientLease {
    pub fn client(&self) -> &dyn ProtocolClient {
        &*self.client
    }

    pub fn phone(&self) -> &PhoneNumber {
        &self.phone
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        let ours = state
            .live
            .get(&self.phone)
            .is_some_and(|l| Arc::ptr_eq(&l.client, &self.client));
        if ours {
            state.live.remove(&self.phone);
            tracing::debug!(phone = %self.phone, "[manager] lease released");
        }
    }
}

// ─── SessionManager ───────────────────────────────────────────────────────────

/// Owns every live client and the in-memory copy of the credential store.
///
/// Construct one per process and share it (it is cheap to put in an `Arc`).
pub struct SessionManager {
    factory:   Arc<dyn ClientFactory>,
    store:     Arc<dyn CredentialStore>,
    shared:    Arc<Shared>,
    save_lock: AsyncMutex<()>,
}

impl SessionManager {
    /// Load the store and build a manager around it.
    ///
    /// Records whose blob the factory rejects are dropped with a warning.
    pub async fn open(
        factory: Arc<dyn ClientFactory>,
        store:   Arc<dyn CredentialStore>,
    ) -> Result<Self, GatewayError> {
        let loaded = store.load().await;
        let mut records = SessionMap::new();
        for (phone, record) in loaded {
            if let SessionRecord::Authenticated { session, .. } = &record {
                if let Err(e) = factory.validate_session(session.as_str()) {
                    tracing::warn!(%phone, "[manager] dropping stored session: {e}");
                    continue;
                }
            }
            records.insert(phone, record);
        }
        tracing::info!(
            "[manager] {} session record(s) loaded from {} store",
            records.len(),
            store.name(),
        );

        let shared = Shared { state: Mutex::new(State { records, ..State::default() }), ..Shared::default() };
        Ok(Self { factory, store, shared: Arc::new(shared), save_lock: AsyncMutex::new(()) })
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    async fn lock_phone(&self, phone: &PhoneNumber) -> PhoneGuard {
        let lock = self.shared.locks().entry(phone.clone()).or_default().clone();
        PhoneGuard {
            guard:  Some(lock.lock_owned().await),
            phone:  phone.clone(),
            shared: self.shared.clone(),
        }
    }

    fn register(&self, phone: &PhoneNumber, client: Arc<dyn ProtocolClient>, stage: Stage) {
        let previous = self.shared.state().live.insert(phone.clone(), LiveClient { client, stage });
        if previous.is_some() {
            tracing::warn!(%phone, "[manager] replaced a live client that was still registered");
        }
    }

    fn live_client(&self, phone: &PhoneNumber, stage: Stage) -> Option<Arc<dyn ProtocolClient>> {
        self.shared
            .state()
            .live
            .get(phone)
            .filter(|l| l.stage == stage)
            .map(|l| l.client.clone())
    }

    fn set_stage(&self, phone: &PhoneNumber, stage: Stage) {
        if let Some(l) = self.shared.state().live.get_mut(phone) {
            l.stage = stage;
        }
    }

    /// Write the whole record map. A failure leaves memory as it is.
    async fn persist(&self) -> Result<(), GatewayError> {
        let _save = self.save_lock.lock().await;
        let snapshot = self.shared.state().records.clone();
        self.store.save(&snapshot).await.map_err(|e| {
            tracing::error!("[manager] failed to persist sessions: {e}");
            GatewayError::Persistence(e)
        })
    }

    /// Capture identity and credentials from a signed-in client and persist them.
    async fn complete(&self, phone: &PhoneNumber, client: &dyn ProtocolClient) -> Result<(), GatewayError> {
        let me      = client.get_me().await?;
        let session = client.export_session().await?;
        self.shared.state().records.insert(phone.clone(), SessionRecord::Authenticated {
            session,
            user_id:  me.user_id,
            username: me.username.clone(),
        });
        tracing::info!(%phone, user_id = me.user_id, state = "authenticated", "[manager] signed in");
        self.persist().await
    }

    // ── Auth flow ──────────────────────────────────────────────────────────

    /// Begin logging in `phone`.
    ///
    /// Short-circuits with [`StartOutcome::AlreadyAuthorized`] (no network
    /// call) when a completed record exists.
    pub async fn start_auth(
        &self,
        phone: &PhoneNumber,
        app:   &AppCredentials,
    ) -> Result<StartOutcome, GatewayError> {
        let _guard = self.lock_phone(phone).await;

        let authenticated = self
            .shared
            .state()
            .records
            .get(phone)
            .is_some_and(SessionRecord::is_authenticated);
        if authenticated {
            tracing::info!(%phone, "[manager] already authorized");
            return Ok(StartOutcome::AlreadyAuthorized);
        }

        self.shared.take_live(phone);
        let client = self.factory.create(phone, app, None).await?;

        if client.is_authorized().await? {
            tracing::info!(%phone, "[manager] remote side reports an authorized session");
            self.complete(phone, &*client).await?;
            return Ok(StartOutcome::AlreadyAuthorized);
        }

        let phone_code_hash = client.send_code(phone).await?;
        self.register(phone, client, Stage::PendingCode);
        self.shared.state().records.insert(phone.clone(), SessionRecord::Pending);
        tracing::info!(%phone, state = "pending_code", "[manager] login code sent");

        if let Err(e) = self.persist().await {
            self.shared.take_live(phone);
            return Err(e);
        }
        Ok(StartOutcome::CodeSent { phone_code_hash })
    }

    /// Submit the login code sent by [`SessionManager::start_auth`].
    pub async fn verify_code(
        &self,
        phone:           &PhoneNumber,
        code:            &str,
        phone_code_hash: &str,
    ) -> Result<CodeOutcome, GatewayError> {
        let code = validation::normalize_code(code)?;
        let phone_code_hash = phone_code_hash.trim();
        if phone_code_hash.is_empty() {
            return Err(ValidationError::Field("phone_code_hash must not be empty".into()).into());
        }

        let _guard = self.lock_phone(phone).await;
        let client = self
            .live_client(phone, Stage::PendingCode)
            .ok_or_else(|| GatewayError::NoActiveSession(phone.clone()))?;

        match client.sign_in(phone, phone_code_hash, &code).await {
            AuthOutcome::Success => {
                let result = self.complete(phone, &*client).await;
                self.shared.take_live(phone);
                result.map_err(|e| after_sign_in(phone, e)).map(|()| CodeOutcome::Success)
            }
            AuthOutcome::PasswordRequired => {
                self.set_stage(phone, Stage::PendingPassword);
                tracing::info!(%phone, state = "pending_password", "[manager] 2FA password required");
                Ok(CodeOutcome::PasswordRequired)
            }
            AuthOutcome::RateLimited { seconds } => {
                tracing::warn!(%phone, seconds, "[manager] rate limited during sign-in");
                Err(GatewayError::RateLimited { seconds })
            }
            AuthOutcome::InvalidCode => {
                self.shared.take_live(phone);
                tracing::info!(%phone, "[manager] invalid code, flow must restart");
                Err(GatewayError::InvalidCode(
                    "the code is wrong or expired, please request a new one".into(),
                ))
            }
            AuthOutcome::ConnectionError(msg) => {
                self.shared.take_live(phone);
                Err(GatewayError::ConnectionFailed(msg))
            }
            AuthOutcome::InvalidPassword => {
                self.shared.take_live(phone);
                Err(GatewayError::AuthenticationFailed("unexpected password rejection".into()))
            }
            AuthOutcome::Rejected(msg) => {
                self.shared.take_live(phone);
                Err(GatewayError::AuthenticationFailed(msg))
            }
        }
    }

    /// Submit the 2FA password after [`CodeOutcome::PasswordRequired`].
    ///
    /// Any failure ends the flow; the caller restarts from `start_auth`.
    pub async fn verify_password(&self, phone: &PhoneNumber, password: &str) -> Result<(), GatewayError> {
        if password.is_empty() {
            return Err(ValidationError::Field("password must not be empty".into()).into());
        }

        let _guard = self.lock_phone(phone).await;
        let client = self
            .live_client(phone, Stage::PendingPassword)
            .ok_or_else(|| GatewayError::NoActiveSession(phone.clone()))?;

        let outcome = client.check_password(password).await;
        if outcome == AuthOutcome::Success {
            let result = self.complete(phone, &*client).await;
            self.shared.take_live(phone);
            return result.map_err(|e| after_sign_in(phone, e));
        }

        self.shared.take_live(phone);
        tracing::info!(%phone, ?outcome, "[manager] password check failed, flow must restart");
        Err(match outcome {
            AuthOutcome::RateLimited { seconds } => GatewayError::RateLimited { seconds },
            AuthOutcome::ConnectionError(msg)    => GatewayError::ConnectionFailed(msg),
            AuthOutcome::InvalidPassword         => GatewayError::AuthenticationFailed("invalid password".into()),
            AuthOutcome::Rejected(msg)           => GatewayError::AuthenticationFailed(msg),
            other                                => GatewayError::AuthenticationFailed(format!("{other:?}")),
        })
    }

    // ── Query access ───────────────────────────────────────────────────────

    /// Connect a fresh client from the stored session.
    ///
    /// Any previous live client for `phone` is torn down first.
    pub async fn get_client(
        &self,
        phone: &PhoneNumber,
        app:   &AppCredentials,
    ) -> Result<ClientLease, GatewayError> {
        let guard = self.lock_phone(phone).await;

        let session = match self.shared.state().records.get(phone) {
            Some(SessionRecord::Authenticated { session, .. }) => session.clone(),
            _ => return Err(GatewayError::SessionNotFound(phone.clone())),
        };

        self.shared.take_live(phone);
        let client = self.factory.create(phone, app, Some(&session)).await?;
        self.register(phone, client.clone(), Stage::Leased);
        tracing::debug!(%phone, "[manager] client leased");

        Ok(ClientLease { phone: phone.clone(), client, shared: self.shared.clone(), _guard: guard })
    }

    pub async fn account_info(
        &self,
        phone: &PhoneNumber,
        app:   &AppCredentials,
    ) -> Result<AccountInfo, GatewayError> {
        let lease = self.get_client(phone, app).await?;
        let me    = lease.client().get_me().await?;
        Ok(AccountInfo {
            phone_number:  phone.clone(),
            user_id:       me.user_id,
            username:      me.username,
            is_authorized: true,
        })
    }

    // ── Records ────────────────────────────────────────────────────────────

    /// Delete the stored record for `phone` and close its live client.
    pub async fn remove_session(&self, phone: &PhoneNumber) -> Result<(), GatewayError> {
        let _guard = self.lock_phone(phone).await;

        if self.shared.state().records.remove(phone).is_none() {
            return Err(GatewayError::SessionNotFound(phone.clone()));
        }
        self.shared.take_live(phone);
        tracing::info!(%phone, state = "no_session", "[manager] session removed");
        self.persist().await
    }

    /// Completed sessions only; pending records are never listed.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.shared
            .state()
            .records
            .iter()
            .filter_map(|(phone, r)| match r {
                SessionRecord::Authenticated { user_id, username, .. } => Some(SessionInfo {
                    phone_number: phone.clone(),
                    user_id:      *user_id,
                    username:     username.clone(),
                }),
                SessionRecord::Pending => None,
            })
            .collect()
    }

    pub fn session_state(&self, phone: &PhoneNumber) -> AuthState {
        let state = self.shared.state();
        match state.live.get(phone).map(|l| l.stage) {
            Some(Stage::PendingCode)     => return AuthState::PendingCode,
            Some(Stage::PendingPassword) => return AuthState::PendingPassword,
            Some(Stage::Leased) | None   => {}
        }
        match state.records.get(phone) {
            Some(SessionRecord::Authenticated { .. }) => AuthState::Authenticated,
            Some(SessionRecord::Pending) | None       => AuthState::NoSession,
        }
    }

    /// Number of live clients currently registered.
    pub fn live_clients(&self) -> usize {
        self.shared.state().live.len()
    }

    /// Number of phone numbers whose lock is held or awaited right now.
    pub fn locked_phones(&self) -> usize {
        self.shared.locks().len()
    }

    /// Tear down every live client.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.shared.state().live.drain().collect();
        tracing::info!("[manager] shutdown: closed {} live client(s)", drained.len());
    }
}

/// The signed-in client is gone once `complete` fails, so a flood wait
/// cannot be retried against it.
fn after_sign_in(phone: &PhoneNumber, e: GatewayError) -> GatewayError {
    match e {
        GatewayError::RateLimited { seconds } => {
            tracing::warn!(%phone, seconds, "[manager] rate limited while capturing the session");
            GatewayError::AuthenticationFailed(format!(
                "signed in but the session could not be captured (rate limited for {seconds} seconds), \
                 please restart the authentication process"
            ))
        }
        other => other,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
