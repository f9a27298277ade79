//! Input validation: verification codes, session blob format, public message
//! links, search limits and chat-type filters.
//!
//! Everything here is pure and runs before any network call.

use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::errors::ValidationError;
use crate::protocol::ChatKind;

// ─── Verification codes ───────────────────────────────────────────────────────

const CODE_MIN_LEN: usize = 4;
const CODE_MAX_LEN: usize = 8;

/// Normalize a login code to its digit string.
///
/// Surrounding and embedded whitespace or `-` separators are dropped
/// (`"12 345"`, `"12-345"` → `"12345"`); anything else non-numeric, or a
/// length outside 4–8 digits, is rejected.
pub fn normalize_code(code: &str) -> Result<String, ValidationError> {
    let digits: String = code
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if digits.is_empty() {
        return Err(ValidationError::Code("code is empty"));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::Code("code must contain digits only"));
    }
    if !(CODE_MIN_LEN..=CODE_MAX_LEN).contains(&digits.len()) {
        return Err(ValidationError::Code("code has the wrong length"));
    }
    Ok(digits)
}

// ─── Session blobs ────────────────────────────────────────────────────────────

/// Structural check of a session blob: non-empty, padded standard base64.
///
/// Returns the decoded bytes. Says nothing about whether Telegram will still
/// accept the credential.
pub fn decode_blob(blob: &str) -> Result<Vec<u8>, ValidationError> {
    if blob.is_empty() {
        return Err(ValidationError::SessionBlob("empty".into()));
    }
    let bytes = STANDARD
        .decode(blob)
        .map_err(|e| ValidationError::SessionBlob(e.to_string()))?;
    if bytes.is_empty() {
        return Err(ValidationError::SessionBlob("decodes to zero bytes".into()));
    }
    Ok(bytes)
}

/// Inverse of [`decode_blob`].
pub fn encode_blob(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

// ─── Public message links ─────────────────────────────────────────────────────

/// A parsed public message link such as `https://t.me/durov/42`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageLink {
    pub username:   String,
    pub message_id: i32,
}

/// Parse `https://t.me/{username}/{id}` (also `http://`, bare `t.me/`,
/// `@username/id` and `username/id`).
pub fn parse_message_link(link: &str) -> Result<MessageLink, ValidationError> {
    let invalid = || ValidationError::MessageLink(link.to_string());

    let trimmed = link.trim().trim_start_matches('@');
    let path = ["https://t.me/", "http://t.me/", "t.me/"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed);
    let path = path.split(['?', '#']).next().unwrap_or("").trim_matches('/');

    let mut parts = path.split('/');
    let (Some(username), Some(id), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if username.is_empty() || username == "c" {
        return Err(invalid());
    }
    let message_id = id.parse::<i32>().ok().filter(|id| *id > 0).ok_or_else(invalid)?;
    Ok(MessageLink { username: username.to_string(), message_id })
}

// ─── Search parameters ────────────────────────────────────────────────────────

/// Result cap for search endpoints: 1–100, default 20.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchLimit(usize);

impl SearchLimit {
    pub const MIN: usize = 1;
    pub const MAX: usize = 100;
    pub const DEFAULT: usize = 20;

    pub fn new(n: usize) -> Result<Self, ValidationError> {
        if (Self::MIN..=Self::MAX).contains(&n) {
            Ok(Self(n))
        } else {
            Err(ValidationError::Limit { min: Self::MIN, max: Self::MAX, got: n })
        }
    }

    pub fn get(self) -> usize { self.0 }
}

impl Default for SearchLimit {
    fn default() -> Self { Self(Self::DEFAULT) }
}

/// Chat-type filter for global search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatFilter {
    Private,
    Group,
    Channel,
    #[default]
    All,
}

impl ChatFilter {
    pub fn matches(self, kind: ChatKind) -> bool {
        match self {
            Self::All     => true,
            Self::Private => kind == ChatKind::Private,
            Self::Group   => kind == ChatKind::Group,
            Self::Channel => kind == ChatKind::Channel,
        }
    }
}

impl FromStr for ChatFilter {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "group"   => Ok(Self::Group),
            "channel" => Ok(Self::Channel),
            "all"     => Ok(Self::All),
            other     => Err(ValidationError::Field(format!(
                "chat_type must be one of private, group, channel, all; got {other:?}"
            ))),
        }
    }
}

/// Reject empty or whitespace-only search queries.
pub fn require_query(query: &str) -> Result<&str, ValidationError> {
    let q = query.trim();
    if q.is_empty() {
        Err(ValidationError::Field("query must not be empty".into()))
    } else {
        Ok(q)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
