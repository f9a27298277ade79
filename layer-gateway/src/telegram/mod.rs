//! [`ClientFactory`] / [`ProtocolClient`] backed by [`layer_client::Client`].
//!
//! Every client gets its own scratch directory holding layer-client's binary
//! session file. A session blob is that file, base64-encoded: resuming writes
//! it into the scratch directory before connecting, exporting saves the
//! session and reads the file back. Dropping the client deletes the directory.
//!
//! Chat ids crossing this boundary are "marked" ids, the convention the Bot
//! API uses: users positive, basic groups `-id`, channels `-100…id`.

pub mod blob;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use layer_client::{
    BinaryFileBackend, Client, Config, InvocationError, LoginToken, NoRetries, PasswordToken,
    SignInError,
};
use layer_tl_types as tl;
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::errors::{GatewayError, ProtocolError};
use crate::phone::PhoneNumber;
use crate::protocol::{
    AppCredentials, AuthOutcome, ChatKind, ChatRef, ClientFactory, ForwardBatch, GlobalSearchPage,
    Identity, ProtocolClient, RemoteChat, RemoteMessage, RemoteUser,
};
use crate::store::SessionBlob;
use crate::validation;

const SESSION_FILE: &str = "client.session";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Dialogs fetched to learn access hashes for peers addressed by id.
const DIALOG_WARMUP: i32 = 100;

// ─── Marked ids ───────────────────────────────────────────────────────────────

const CHANNEL_MARK: i64 = 1_000_000_000_000;

pub(crate) fn marked_id(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(u)    => u.user_id,
        tl::enums::Peer::Chat(c)    => -c.chat_id,
        tl::enums::Peer::Channel(c) => -(CHANNEL_MARK + c.channel_id),
    }
}

pub(crate) fn peer_from_marked(id: i64) -> tl::enums::Peer {
    if id >= 0 {
        tl::enums::Peer::User(tl::types::PeerUser { user_id: id })
    } else if id <= -CHANNEL_MARK {
        tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: -id - CHANNEL_MARK })
    } else {
        tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: -id })
    }
}

// ─── Error classification ─────────────────────────────────────────────────────

fn classify(e: InvocationError) -> ProtocolError {
    if let Some(seconds) = e.flood_wait_seconds() {
        return ProtocolError::RateLimited { seconds };
    }
    match e {
        InvocationError::Rpc(r)  => ProtocolError::Rejected { code: r.code, name: r.name },
        InvocationError::Io(e)   => ProtocolError::Connection(e.to_string()),
        InvocationError::Dropped => ProtocolError::Connection("request dropped".into()),
        other                    => ProtocolError::Unexpected(other.to_string()),
    }
}

fn auth_outcome(e: InvocationError) -> AuthOutcome {
    match classify(e) {
        ProtocolError::RateLimited { seconds }  => AuthOutcome::RateLimited { seconds },
        ProtocolError::Connection(msg)          => AuthOutcome::ConnectionError(msg),
        p if p.is("PHONE_CODE_*")               => AuthOutcome::InvalidCode,
        p if p.is("PASSWORD_HASH_INVALID")      => AuthOutcome::InvalidPassword,
        other                                   => AuthOutcome::Rejected(other.to_string()),
    }
}

// ─── Factory ──────────────────────────────────────────────────────────────────

/// Builds [`layer_client::Client`]s.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use layer_gateway::LayerClientFactory;
///
/// let factory = LayerClientFactory::default()
///     .scratch_dir("/var/lib/gateway/scratch")
///     .connect_timeout(Duration::from_secs(10));
/// ```
#[derive(Clone, Debug)]
pub struct LayerClientFactory {
    scratch_dir:     Option<PathBuf>,
    connect_timeout: Duration,
}

impl Default for LayerClientFactory {
    fn default() -> Self {
        Self { scratch_dir: None, connect_timeout: DEFAULT_CONNECT_TIMEOUT }
    }
}

impl LayerClientFactory {
    /// Parent directory for per-client scratch directories (default: system temp).
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn make_scratch(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("layer-gateway-");
        match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }
}

#[async_trait]
impl ClientFactory for LayerClientFactory {
    fn validate_session(&self, blob: &str) -> Result<SessionBlob, GatewayError> {
        let bytes  = validation::decode_blob(blob)
            .map_err(|e| GatewayError::InvalidSessionBlob(e.to_string()))?;
        let layout = blob::parse(&bytes)
            .map_err(|e| GatewayError::InvalidSessionBlob(e.to_string()))?;
        if !layout.home_keyed {
            return Err(GatewayError::InvalidSessionBlob(format!(
                "home DC{} has no auth key", layout.home_dc_id
            )));
        }
        Ok(SessionBlob::new(blob))
    }

    async fn create(
        &self,
        phone:   &PhoneNumber,
        app:     &AppCredentials,
        session: Option<&SessionBlob>,
    ) -> Result<Arc<dyn ProtocolClient>, GatewayError> {
        let bytes = match session {
            Some(s) => {
                self.validate_session(s.as_str())?;
                validation::decode_blob(s.as_str()).ok()
            }
            None => None,
        };

        let scratch = self
            .make_scratch()
            .map_err(|e| GatewayError::Internal(format!("scratch directory: {e}")))?;
        let session_path = scratch.path().join(SESSION_FILE);
        if let Some(bytes) = &bytes {
            tokio::fs::write(&session_path, bytes)
                .await
                .map_err(|e| GatewayError::Internal(format!("writing session file: {e}")))?;
        }

        let config = Config {
            api_id:          app.app_id,
            api_hash:        app.app_secret.clone(),
            retry_policy:    Arc::new(NoRetries),
            session_backend: Arc::new(BinaryFileBackend::new(&session_path)),
            ..Default::default()
        };

        tracing::debug!(%phone, resumed = bytes.is_some(), "[telegram] connecting");
        let client = match tokio::time::timeout(self.connect_timeout, Client::connect(config)).await {
            Ok(Ok(c))  => c,
            Ok(Err(e)) => return Err(GatewayError::ConnectionFailed(e.to_string())),
            Err(_)     => {
                return Err(GatewayError::ConnectionFailed(format!(
                    "timed out after {} s", self.connect_timeout.as_secs()
                )));
            }
        };
        tracing::debug!(%phone, "[telegram] connected");

        Ok(Arc::new(LayerProtocolClient {
            client,
            session_path,
            login:    Mutex::new(None),
            password: Mutex::new(None),
            _scratch: scratch,
        }))
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

struct PendingLogin {
    token:     LoginToken,
    /// Hash handed to the caller; the provider's own hash stays in `token`.
    code_hash: String,
}

/// A connected layer-client plus its in-flight login state.
///
/// Dropping it closes the connection; nothing else holds the client.
/// Field order matters: the client must drop before its scratch directory.
pub struct LayerProtocolClient {
    client:       Client,
    session_path: PathBuf,
    login:        Mutex<Option<PendingLogin>>,
    password:     Mutex<Option<PasswordToken>>,
    _scratch:     TempDir,
}

fn mint_code_hash() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn remote_user(user: &tl::enums::User) -> Option<RemoteUser> {
    match user {
        tl::enums::User::User(u) => Some(RemoteUser {
            id:         u.id,
            first_name: u.first_name.clone(),
            last_name:  u.last_name.clone(),
            username:   u.username.clone(),
            phone:      u.phone.clone(),
        }),
        tl::enums::User::Empty(_) => None,
    }
}

fn user_chat(user: &tl::enums::User) -> Option<RemoteChat> {
    let u = remote_user(user)?;
    let title = [u.first_name.as_deref(), u.last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    Some(RemoteChat {
        id:       u.id,
        kind:     ChatKind::Private,
        title:    non_empty(&title),
        username: u.username,
        members:  None,
    })
}

fn remote_chat(chat: &tl::enums::Chat) -> Option<RemoteChat> {
    let (peer, kind, title, username, members) = match chat {
        tl::enums::Chat::Chat(c) => (
            tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: c.id }),
            ChatKind::Group,
            c.title.clone(),
            None,
            Some(c.participants_count),
        ),
        tl::enums::Chat::Forbidden(c) => (
            tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: c.id }),
            ChatKind::Group,
            c.title.clone(),
            None,
            None,
        ),
        tl::enums::Chat::Channel(c) => (
            tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: c.id }),
            ChatKind::classify(false, c.broadcast, c.megagroup, c.gigagroup),
            c.title.clone(),
            c.username.clone(),
            c.participants_count,
        ),
        tl::enums::Chat::ChannelForbidden(c) => (
            tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: c.id }),
            ChatKind::classify(false, c.broadcast, c.megagroup, false),
            c.title.clone(),
            None,
            None,
        ),
        tl::enums::Chat::Empty(_) => return None,
    };
    Some(RemoteChat {
        id:       marked_id(&peer),
        kind,
        title:    non_empty(&title),
        username,
        members:  members.and_then(|n| u32::try_from(n).ok()),
    })
}

fn remote_message(msg: &tl::enums::Message) -> Option<RemoteMessage> {
    let tl::enums::Message::Message(m) = msg else { return None };
    let from_user = match &m.from_id {
        Some(tl::enums::Peer::User(u)) => Some(u.user_id),
        Some(_)                        => None,
        None => match &m.peer_id {
            tl::enums::Peer::User(u) if !m.out => Some(u.user_id),
            _ => None,
        },
    };
    Some(RemoteMessage {
        id:      m.id,
        chat_id: marked_id(&m.peer_id),
        text:    non_empty(&m.message),
        date:    DateTime::from_timestamp(i64::from(m.date), 0),
        from_user,
    })
}

fn message_id(msg: &tl::enums::Message) -> Option<i32> {
    match msg {
        tl::enums::Message::Message(m) => Some(m.id),
        tl::enums::Message::Service(m) => Some(m.id),
        tl::enums::Message::Empty(_)   => None,
    }
}

/// New message ids from a forward's `Updates`, in request order when the
/// server reports `updateMessageID`s for our random ids.
fn forwarded_ids(updates: tl::enums::Updates, random_ids: &[i64]) -> Vec<i32> {
    let list = match updates {
        tl::enums::Updates::Updates(u)  => u.updates,
        tl::enums::Updates::Combined(u) => u.updates,
        _ => Vec::new(),
    };

    let mut by_random = HashMap::new();
    let mut created   = Vec::new();
    for upd in list {
        match upd {
            tl::enums::Update::MessageId(u)         => { by_random.insert(u.random_id, u.id); }
            tl::enums::Update::NewMessage(u)        => created.extend(message_id(&u.message)),
            tl::enums::Update::NewChannelMessage(u) => created.extend(message_id(&u.message)),
            _ => {}
        }
    }

    let ordered: Vec<i32> = random_ids.iter().filter_map(|r| by_random.get(r).copied()).collect();
    if ordered.is_empty() { created } else { ordered }
}

impl LayerProtocolClient {
    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    async fn peer_of(&self, chat: &ChatRef) -> Result<tl::enums::Peer, ProtocolError> {
        match chat {
            ChatRef::Username(u) => self.client.resolve_peer(&format!("@{u}")).await.map_err(classify),
            ChatRef::Id(id)      => Ok(peer_from_marked(*id)),
        }
    }

    /// Resolve to an input peer, fetching dialogs once if the access hash
    /// has not been seen yet.
    async fn input_peer(&self, chat: &ChatRef) -> Result<tl::enums::InputPeer, ProtocolError> {
        let peer = self.peer_of(chat).await?;
        if let Ok(p) = self.client.resolve_to_input_peer(&peer).await {
            return Ok(p);
        }
        tracing::debug!("[telegram] access hash for {chat} unknown, fetching dialogs");
        self.client.get_dialogs(DIALOG_WARMUP).await.map_err(classify)?;
        self.client.resolve_to_input_peer(&peer).await.map_err(classify)
    }
}

#[async_trait]
impl ProtocolClient for LayerProtocolClient {
    async fn is_authorized(&self) -> Result<bool, ProtocolError> {
        self.client.is_authorized().await.map_err(classify)
    }

    async fn send_code(&self, phone: &PhoneNumber) -> Result<String, ProtocolError> {
        let token     = self.client.request_login_code(phone.as_str()).await.map_err(classify)?;
        let code_hash = mint_code_hash();
        *self.login.lock().await = Some(PendingLogin { token, code_hash: code_hash.clone() });
        *self.password.lock().await = None;
        Ok(code_hash)
    }

    async fn sign_in(&self, phone: &PhoneNumber, phone_code_hash: &str, code: &str) -> AuthOutcome {
        let login = self.login.lock().await;
        let Some(pending) = login.as_ref() else {
            return AuthOutcome::InvalidCode;
        };
        if pending.code_hash != phone_code_hash {
            tracing::debug!(%phone, "[telegram] phone_code_hash does not match the last code sent");
            return AuthOutcome::InvalidCode;
        }

        match self.client.sign_in(&pending.token, code).await {
            Ok(_) => AuthOutcome::Success,
            Err(SignInError::PasswordRequired(token)) => {
                *self.password.lock().await = Some(*token);
                AuthOutcome::PasswordRequired
            }
            Err(SignInError::InvalidCode)    => AuthOutcome::InvalidCode,
            Err(SignInError::SignUpRequired) => {
                AuthOutcome::Rejected("phone number is not registered with Telegram".into())
            }
            Err(SignInError::Other(e))       => auth_outcome(e),
        }
    }

    async fn check_password(&self, password: &str) -> AuthOutcome {
        let Some(token) = self.password.lock().await.take() else {
            return AuthOutcome::Rejected("no password challenge pending".into());
        };
        match self.client.check_password(token, password.as_bytes()).await {
            Ok(_)  => AuthOutcome::Success,
            Err(e) => auth_outcome(e),
        }
    }

    async fn get_me(&self) -> Result<Identity, ProtocolError> {
        let me = self.client.get_me().await.map_err(classify)?;
        Ok(Identity { user_id: me.id, username: me.username })
    }

    async fn export_session(&self) -> Result<SessionBlob, ProtocolError> {
        self.client.save_session().await.map_err(classify)?;
        let bytes = tokio::fs::read(&self.session_path)
            .await
            .map_err(|e| ProtocolError::Unexpected(format!("reading session file: {e}")))?;
        Ok(SessionBlob::new(validation::encode_blob(&bytes)))
    }

    async fn contacts(&self) -> Result<Vec<RemoteUser>, ProtocolError> {
        let req = tl::functions::contacts::GetContacts { hash: 0 };
        match self.client.invoke(&req).await.map_err(classify)? {
            tl::enums::contacts::Contacts::Contacts(c) => {
                self.client.cache_users_slice_pub(&c.users).await;
                Ok(c.users.iter().filter_map(remote_user).collect())
            }
            tl::enums::contacts::Contacts::NotModified => Ok(Vec::new()),
        }
    }

    async fn search_contacts(&self, query: &str, limit: usize) -> Result<Vec<RemoteUser>, ProtocolError> {
        let req = tl::functions::contacts::Search {
            q:     query.to_string(),
            limit: i32::try_from(limit).unwrap_or(i32::MAX),
        };
        let tl::enums::contacts::Found::Found(found) = self.client.invoke(&req).await.map_err(classify)?;
        self.client.cache_users_slice_pub(&found.users).await;
        self.client.cache_chats_slice_pub(&found.chats).await;

        let users: HashMap<i64, RemoteUser> = found
            .users
            .iter()
            .filter_map(remote_user)
            .map(|u| (u.id, u))
            .collect();
        Ok(found
            .my_results
            .iter()
            .chain(found.results.iter())
            .filter_map(|p| match p {
                tl::enums::Peer::User(u) => users.get(&u.user_id).cloned(),
                _ => None,
            })
            .collect())
    }

    async fn search_global(&self, query: &str, limit: usize) -> Result<GlobalSearchPage, ProtocolError> {
        let req = tl::functions::messages::SearchGlobal {
            broadcasts_only: false,
            groups_only:     false,
            users_only:      false,
            folder_id:       None,
            q:               query.to_string(),
            filter:          tl::enums::MessagesFilter::InputMessagesFilterEmpty,
            min_date:        0,
            max_date:        0,
            offset_rate:     0,
            offset_peer:     tl::enums::InputPeer::Empty,
            offset_id:       0,
            limit:           i32::try_from(limit).unwrap_or(i32::MAX),
        };
        let (messages, chats, users) = match self.client.invoke(&req).await.map_err(classify)? {
            tl::enums::messages::Messages::Messages(m)        => (m.messages, m.chats, m.users),
            tl::enums::messages::Messages::Slice(m)           => (m.messages, m.chats, m.users),
            tl::enums::messages::Messages::ChannelMessages(m) => (m.messages, m.chats, m.users),
            tl::enums::messages::Messages::NotModified(_)     => return Ok(GlobalSearchPage::default()),
        };
        self.client.cache_users_slice_pub(&users).await;
        self.client.cache_chats_slice_pub(&chats).await;

        Ok(GlobalSearchPage {
            messages: messages.iter().filter_map(remote_message).collect(),
            chats:    chats
                .iter()
                .filter_map(remote_chat)
                .chain(users.iter().filter_map(user_chat))
                .collect(),
        })
    }

    async fn join_chat(&self, chat: &ChatRef) -> Result<(), ProtocolError> {
        let peer = self.peer_of(chat).await?;
        if matches!(peer, tl::enums::Peer::User(_)) {
            return Ok(());
        }
        self.client.join_chat(peer).await.map_err(classify)
    }

    async fn forward_messages(&self, batch: &ForwardBatch) -> Result<Vec<i32>, ProtocolError> {
        let from_peer = self.input_peer(&batch.from).await?;
        let to_peer   = self.input_peer(&batch.to).await?;

        let req = tl::functions::messages::ForwardMessages {
            silent:                 batch.silent,
            background:             false,
            with_my_score:          false,
            drop_author:            batch.drop_author,
            drop_media_captions:    batch.drop_captions,
            noforwards:             batch.noforwards,
            from_peer,
            id:                     batch.message_ids.clone(),
            random_id:              batch.random_ids.clone(),
            to_peer,
            top_msg_id:             None,
            reply_to:               None,
            schedule_date:          None,
            schedule_repeat_period: None,
            send_as:                None,
            quick_reply_shortcut:   None,
            effect:                 None,
            video_timestamp:        None,
            allow_paid_stars:       None,
            allow_paid_floodskip:   false,
            suggested_post:         None,
        };
        let updates = self.client.invoke(&req).await.map_err(classify)?;
        Ok(forwarded_ids(updates, &batch.random_ids))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
