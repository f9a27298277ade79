//! Scripted in-memory [`ProtocolClient`] / [`ClientFactory`] for tests.
//!
//! Enabled inside this crate's tests and, for other crates, with the
//! `test-util` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::errors::{GatewayError, ProtocolError};
use crate::phone::PhoneNumber;
use crate::protocol::{
    AppCredentials, AuthOutcome, ChatRef, ClientFactory, ForwardBatch, GlobalSearchPage, Identity,
    ProtocolClient, RemoteUser,
};
use crate::store::SessionBlob;
use crate::validation;

const BLOB_PREFIX: &str = "fake-session:";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the fake remote side behaves.
#[derive(Clone, Debug)]
pub struct FakeBehavior {
    /// The code `sign_in` accepts.
    pub code:              String,
    /// `Some` enables 2FA with this password.
    pub password:          Option<String>,
    /// A fresh client already reports itself authorized.
    pub remote_authorized: bool,
    pub user_id:           i64,
    pub username:          Option<String>,
    pub connect_error:     Option<String>,
    pub send_code_error:   Option<ProtocolError>,
    pub sign_in_flood:     Option<u64>,
    pub password_flood:    Option<u64>,
    /// `get_me` answers with a flood wait even after sign-in.
    pub me_flood:          Option<u64>,
    pub contacts:          Vec<RemoteUser>,
    pub search_results:    Vec<RemoteUser>,
    pub global:            GlobalSearchPage,
    pub search_error:      Option<ProtocolError>,
    pub join_error:        Option<ProtocolError>,
    /// `None` echoes one new id (`1000 + i`) per forwarded message.
    pub forward_result:    Option<Vec<i32>>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            code:              "12345".into(),
            password:          None,
            remote_authorized: false,
            user_id:           1001,
            username:          Some("alice".into()),
            connect_error:     None,
            send_code_error:   None,
            sign_in_flood:     None,
            password_flood:    None,
            me_flood:          None,
            contacts:          Vec::new(),
            search_results:    Vec::new(),
            global:            GlobalSearchPage::default(),
            search_error:      None,
            join_error:        None,
            forward_result:    None,
        }
    }
}

#[derive(Default)]
struct Counters {
    created:        AtomicUsize,
    live:           AtomicUsize,
    sign_in_calls:  AtomicUsize,
    password_calls: AtomicUsize,
    search_limits:  Mutex<Vec<usize>>,
    joined:         Mutex<Vec<ChatRef>>,
    forwarded:      Mutex<Vec<ForwardBatch>>,
}

// ─── Factory ──────────────────────────────────────────────────────────────────

pub struct FakeFactory {
    behavior: Mutex<FakeBehavior>,
    counters: Arc<Counters>,
}

impl FakeFactory {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self { behavior: Mutex::new(behavior), counters: Arc::default() }
    }

    /// Change behavior for clients created from now on.
    pub fn update(&self, f: impl FnOnce(&mut FakeBehavior)) {
        f(&mut lock(&self.behavior));
    }

    /// A blob this factory accepts, as exported for `user_id`.
    pub fn blob_for(user_id: i64) -> SessionBlob {
        SessionBlob::new(validation::encode_blob(format!("{BLOB_PREFIX}{user_id}").as_bytes()))
    }

    pub fn clients_created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    /// Clients created and not yet dropped.
    pub fn live_connections(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn sign_in_calls(&self) -> usize {
        self.counters.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn password_calls(&self) -> usize {
        self.counters.password_calls.load(Ordering::SeqCst)
    }

    /// Limits passed to remote searches, in call order.
    pub fn search_limits(&self) -> Vec<usize> {
        lock(&self.counters.search_limits).clone()
    }

    pub fn joined(&self) -> Vec<ChatRef> {
        lock(&self.counters.joined).clone()
    }

    pub fn forwarded(&self) -> Vec<ForwardBatch> {
        lock(&self.counters.forwarded).clone()
    }
}

impl Default for FakeFactory {
    fn default() -> Self { Self::new(FakeBehavior::default()) }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    fn validate_session(&self, blob: &str) -> Result<SessionBlob, GatewayError> {
        let bytes = validation::decode_blob(blob)
            .map_err(|e| GatewayError::InvalidSessionBlob(e.to_string()))?;
        if !bytes.starts_with(BLOB_PREFIX.as_bytes()) {
            return Err(GatewayError::InvalidSessionBlob("not a fake session".into()));
        }
        Ok(SessionBlob::new(blob))
    }

    async fn create(
        &self,
        _phone:  &PhoneNumber,
        _app:    &AppCredentials,
        session: Option<&SessionBlob>,
    ) -> Result<Arc<dyn ProtocolClient>, GatewayError> {
        if let Some(s) = session {
            self.validate_session(s.as_str())?;
        }
        let behavior = lock(&self.behavior).clone();
        if let Some(msg) = &behavior.connect_error {
            return Err(GatewayError::ConnectionFailed(msg.clone()));
        }

        let n = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            behavior,
            counters:         self.counters.clone(),
            serial:           n,
            resumed:          session.is_some(),
            code_hash:        Mutex::new(None),
            password_pending: AtomicBool::new(false),
            signed_in:        AtomicBool::new(false),
        }))
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

pub struct FakeClient {
    behavior:         FakeBehavior,
    counters:         Arc<Counters>,
    serial:           usize,
    resumed:          bool,
    code_hash:        Mutex<Option<String>>,
    password_pending: AtomicBool,
    signed_in:        AtomicBool,
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeClient {
    fn authorized(&self) -> bool {
        self.resumed || self.behavior.remote_authorized || self.signed_in.load(Ordering::SeqCst)
    }

    fn unauthorized() -> ProtocolError {
        ProtocolError::Rejected { code: 401, name: "AUTH_KEY_UNREGISTERED".into() }
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn is_authorized(&self) -> Result<bool, ProtocolError> {
        Ok(self.authorized())
    }

    async fn send_code(&self, _phone: &PhoneNumber) -> Result<String, ProtocolError> {
        if let Some(e) = &self.behavior.send_code_error {
            return Err(e.clone());
        }
        let hash = format!("hash-{}", self.serial);
        *lock(&self.code_hash) = Some(hash.clone());
        Ok(hash)
    }

    async fn sign_in(&self, _phone: &PhoneNumber, phone_code_hash: &str, code: &str) -> AuthOutcome {
        self.counters.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(seconds) = self.behavior.sign_in_flood {
            return AuthOutcome::RateLimited { seconds };
        }
        let bound = lock(&self.code_hash).as_deref() == Some(phone_code_hash);
        if !bound || code != self.behavior.code {
            return AuthOutcome::InvalidCode;
        }
        if self.behavior.password.is_some() {
            self.password_pending.store(true, Ordering::SeqCst);
            return AuthOutcome::PasswordRequired;
        }
        self.signed_in.store(true, Ordering::SeqCst);
        AuthOutcome::Success
    }

    async fn check_password(&self, password: &str) -> AuthOutcome {
        self.counters.password_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(seconds) = self.behavior.password_flood {
            return AuthOutcome::RateLimited { seconds };
        }
        if !self.password_pending.swap(false, Ordering::SeqCst) {
            return AuthOutcome::Rejected("no password challenge pending".into());
        }
        if self.behavior.password.as_deref() == Some(password) {
            self.signed_in.store(true, Ordering::SeqCst);
            AuthOutcome::Success
        } else {
            AuthOutcome::InvalidPassword
        }
    }

    async fn get_me(&self) -> Result<Identity, ProtocolError> {
        if !self.authorized() {
            return Err(Self::unauthorized());
        }
        if let Some(seconds) = self.behavior.me_flood {
            return Err(ProtocolError::RateLimited { seconds });
        }
        Ok(Identity { user_id: self.behavior.user_id, username: self.behavior.username.clone() })
    }

    async fn export_session(&self) -> Result<SessionBlob, ProtocolError> {
        if !self.authorized() {
            return Err(Self::unauthorized());
        }
        Ok(FakeFactory::blob_for(self.behavior.user_id))
    }

    async fn contacts(&self) -> Result<Vec<RemoteUser>, ProtocolError> {
        Ok(self.behavior.contacts.clone())
    }

    async fn search_contacts(&self, _query: &str, limit: usize) -> Result<Vec<RemoteUser>, ProtocolError> {
        lock(&self.counters.search_limits).push(limit);
        if let Some(e) = &self.behavior.search_error {
            return Err(e.clone());
        }
        Ok(self.behavior.search_results.iter().take(limit).cloned().collect())
    }

    async fn search_global(&self, _query: &str, limit: usize) -> Result<GlobalSearchPage, ProtocolError> {
        lock(&self.counters.search_limits).push(limit);
        if let Some(e) = &self.behavior.search_error {
            return Err(e.clone());
        }
        let mut page = self.behavior.global.clone();
        page.messages.truncate(limit);
        Ok(page)
    }

    async fn join_chat(&self, chat: &ChatRef) -> Result<(), ProtocolError> {
        lock(&self.counters.joined).push(chat.clone());
        match &self.behavior.join_error {
            Some(e) => Err(e.clone()),
            None    => Ok(()),
        }
    }

    async fn forward_messages(&self, batch: &ForwardBatch) -> Result<Vec<i32>, ProtocolError> {
        lock(&self.counters.forwarded).push(batch.clone());
        Ok(match &self.behavior.forward_result {
            Some(ids) => ids.clone(),
            None      => (0..batch.message_ids.len()).map(|i| 1000 + i as i32).collect(),
        })
    }
}
