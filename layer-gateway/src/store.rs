//! Durable persistence of per-phone session records.
//!
//! The [`CredentialStore`] trait abstracts over where the records live so
//! the session manager can run against a JSON file in production and an
//! in-memory map in tests.
//!
//! Two built-in stores are provided:
//! * [`JsonFileStore`]: a single JSON file, rewritten atomically on every save.
//! * [`InMemoryStore`]: nothing on disk; can be told to fail saves.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::errors::StoreError;
use crate::phone::PhoneNumber;
use crate::validation;

// ─── Records ──────────────────────────────────────────────────────────────────

/// An opaque serialized credential, base64 text.
///
/// The contents are secret: `Debug` only prints the length.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionBlob(String);

impl SessionBlob {
    /// Wrap a string already checked by [`validation::decode_blob`] or a
    /// client factory.
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionBlob(<{} chars>)", self.0.len())
    }
}

/// A persisted session record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionRecord {
    /// Authentication started but has not completed yet.
    Pending,
    Authenticated {
        session:  SessionBlob,
        user_id:  i64,
        username: Option<String>,
    },
}

impl SessionRecord {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Every record, ordered by phone number so file output is deterministic.
pub type SessionMap = BTreeMap<PhoneNumber, SessionRecord>;

// ─── Trait ────────────────────────────────────────────────────────────────────

/// An abstraction over where and how session records are persisted.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load every record. Missing or unreadable storage yields an empty map.
    async fn load(&self) -> SessionMap;

    /// Replace the stored records with `sessions`.
    ///
    /// An `Err` means the write did not durably commit.
    async fn save(&self, sessions: &SessionMap) -> Result<(), StoreError>;

    /// Human-readable name of this store (for log messages).
    fn name(&self) -> &str;
}

// ─── On-disk schema ───────────────────────────────────────────────────────────

const SCHEMA_VERSION: u32 = 1;

/// `{"version": 1, "sessions": {"+15551234567": {...}}}`
#[derive(Serialize, Deserialize)]
struct FileV1 {
    version:  u32,
    sessions: BTreeMap<String, StoredRecord>,
}

#[derive(Default, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(default)]
    session_string: Option<String>,
    #[serde(default)]
    user_id:        Option<i64>,
    #[serde(default)]
    username:       Option<String>,
}

impl From<&SessionRecord> for StoredRecord {
    fn from(r: &SessionRecord) -> Self {
        match r {
            SessionRecord::Pending => Self::default(),
            SessionRecord::Authenticated { session, user_id, username } => Self {
                session_string: Some(session.as_str().to_string()),
                user_id:        Some(*user_id),
                username:       username.clone(),
            },
        }
    }
}

impl StoredRecord {
    fn into_record(self) -> Result<SessionRecord, String> {
        match (self.session_string, self.user_id) {
            (None, None) => Ok(SessionRecord::Pending),
            (Some(blob), Some(user_id)) => {
                validation::decode_blob(&blob).map_err(|e| e.to_string())?;
                Ok(SessionRecord::Authenticated {
                    session: SessionBlob::new(blob),
                    user_id,
                    username: self.username.filter(|u| !u.is_empty()),
                })
            }
            (Some(_), None) => Err("session_string without user_id".into()),
            (None, Some(_)) => Err("user_id without session_string".into()),
        }
    }
}

/// Accepted file shapes. The flat map is the legacy layout.
///
/// Records stay raw JSON here so one bad record cannot fail the whole file.
enum AnyFile {
    V1 { version: u64, entries: BTreeMap<String, Value> },
    Legacy(BTreeMap<String, Value>),
}

impl AnyFile {
    fn parse(bytes: &[u8]) -> Result<Self, String> {
        let Value::Object(mut top) = serde_json::from_slice::<Value>(bytes).map_err(|e| e.to_string())? else {
            return Err("top level is not a JSON object".into());
        };
        if !top.contains_key("version") && !top.contains_key("sessions") {
            return Ok(Self::Legacy(top.into_iter().collect()));
        }
        let version = top
            .get("version")
            .and_then(Value::as_u64)
            .ok_or("\"version\" is missing or not a number")?;
        match top.remove("sessions") {
            Some(Value::Object(entries)) => Ok(Self::V1 { version, entries: entries.into_iter().collect() }),
            _ => Err("\"sessions\" is missing or not an object".into()),
        }
    }
}

/// Convert raw entries, dropping any that fail validation.
fn decode_entries(entries: BTreeMap<String, Value>) -> SessionMap {
    let mut out = SessionMap::new();
    for (key, raw) in entries {
        let phone = match PhoneNumber::parse(&key) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[store] dropping record {key:?}: {e}");
                continue;
            }
        };
        let record = serde_json::from_value::<StoredRecord>(raw)
            .map_err(|e| e.to_string())
            .and_then(StoredRecord::into_record);
        match record {
            Ok(record) => {
                out.insert(phone, record);
            }
            Err(e) => tracing::warn!("[store] dropping record for {phone}: {e}"),
        }
    }
    out
}

fn encode_file(sessions: &SessionMap) -> Result<Vec<u8>, serde_json::Error> {
    let file = FileV1 {
        version:  SCHEMA_VERSION,
        sessions: sessions
            .iter()
            .map(|(phone, r)| (phone.as_str().to_string(), StoredRecord::from(r)))
            .collect(),
    };
    serde_json::to_vec_pretty(&file)
}

// ─── JsonFileStore ────────────────────────────────────────────────────────────

/// Stores every record in one JSON file.
///
/// Saves write `<path>.tmp`, fsync it, read it back and parse it, then rename
/// it over `<path>`. A crash mid-save leaves the previous file intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Where an unreadable file is moved before anything overwrites it.
    pub fn corrupt_path(&self) -> PathBuf {
        self.sibling(".corrupt")
    }

    async fn write_atomic(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.tmp_path();

        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        f.sync_all().await?;
        drop(f);

        let written = tokio::fs::read(&tmp).await?;
        if written != bytes {
            return Err(StoreError::Verify("read-back differs from what was written".into()));
        }
        serde_json::from_slice::<FileV1>(&written)
            .map_err(|e| StoreError::Verify(e.to_string()))?;

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn load(&self) -> SessionMap {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("[store] {} does not exist yet, starting empty", self.path.display());
                return SessionMap::new();
            }
            Err(e) => {
                tracing::error!("[store] failed to read {}: {e}", self.path.display());
                return SessionMap::new();
            }
        };

        match AnyFile::parse(&bytes) {
            Ok(AnyFile::V1 { version, entries }) => {
                if version != u64::from(SCHEMA_VERSION) {
                    tracing::warn!("[store] unknown schema version {version}, reading as v{SCHEMA_VERSION}");
                }
                let sessions = decode_entries(entries);
                tracing::info!("[store] loaded {} session record(s)", sessions.len());
                sessions
            }
            Ok(AnyFile::Legacy(entries)) => {
                let sessions = decode_entries(entries);
                tracing::info!("[store] migrating {} legacy record(s) to schema v{SCHEMA_VERSION}", sessions.len());
                if let Err(e) = self.save(&sessions).await {
                    tracing::error!("[store] migration rewrite failed: {e}");
                }
                sessions
            }
            Err(e) => {
                let aside = self.corrupt_path();
                tracing::error!(
                    "[store] {} is malformed, moving it to {} and starting empty: {e}",
                    self.path.display(),
                    aside.display(),
                );
                if let Err(e) = tokio::fs::rename(&self.path, &aside).await {
                    tracing::error!("[store] could not move malformed file aside: {e}");
                }
                SessionMap::new()
            }
        }
    }

    async fn save(&self, sessions: &SessionMap) -> Result<(), StoreError> {
        let bytes = encode_file(sessions)?;
        if let Err(e) = self.write_atomic(&bytes).await {
            let _ = tokio::fs::remove_file(self.tmp_path()).await;
            return Err(e);
        }
        tracing::debug!("[store] saved {} record(s) to {}", sessions.len(), self.path.display());
        Ok(())
    }

    fn name(&self) -> &str { "json-file" }
}

// ─── InMemoryStore ────────────────────────────────────────────────────────────

/// A store that keeps records in memory only.
///
/// Useful for tests and for deployments that should always start fresh.
#[derive(Default)]
pub struct InMemoryStore {
    data:       Mutex<SessionMap>,
    fail_saves: AtomicBool,
    saves:      AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing records.
    pub fn with_sessions(sessions: SessionMap) -> Self {
        Self { data: Mutex::new(sessions), ..Self::default() }
    }

    /// Make every following save fail (or succeed again).
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// What a fresh `load` would return.
    pub fn snapshot(&self) -> SessionMap {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn load(&self) -> SessionMap {
        self.snapshot()
    }

    async fn save(&self, sessions: &SessionMap) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("injected save failure")));
        }
        let mut data = self
            .data
            .lock()
            .map_err(|_| StoreError::Verify("in-memory store poisoned".into()))?;
        *data = sessions.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str { "in-memory" }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
