//! Error types for layer-gateway.
//!
//! Remote failures are classified once, at the protocol boundary, into
//! [`ProtocolError`]; everything the session manager and handlers return is a
//! [`GatewayError`], whose [`ErrorKind`] decides the caller-visible status.

use std::io;

use thiserror::Error;

use crate::phone::PhoneNumber;

// ─── ValidationError ──────────────────────────────────────────────────────────

/// Malformed caller input, rejected before any network call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid phone number format, must be in E.164 format: {0:?}")]
    Phone(String),
    #[error("invalid verification code: {0}")]
    Code(&'static str),
    #[error("invalid session blob: {0}")]
    SessionBlob(String),
    #[error("invalid Telegram message link: {0}")]
    MessageLink(String),
    #[error("limit must be between {min} and {max}, got {got}")]
    Limit { min: usize, max: usize, got: usize },
    #[error("{0}")]
    Field(String),
}

// ─── ProtocolError ────────────────────────────────────────────────────────────

/// A classified failure reported by the protocol client.
///
/// # Example
/// `FLOOD_WAIT_30` → `ProtocolError::RateLimited { seconds: 30 }`
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Network / I/O failure, or the connection never came up.
    #[error("connection error: {0}")]
    Connection(String),
    /// Remote flood control; retry after `seconds`.
    #[error("too many requests, retry in {seconds} s")]
    RateLimited { seconds: u64 },
    /// Telegram rejected the request with a named RPC error.
    #[error("RPC {code}: {name}")]
    Rejected { code: i32, name: String },
    /// The response could not be interpreted.
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl ProtocolError {
    /// Match a [`ProtocolError::Rejected`] name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("PHONE_NUMBER_BANNED")`: exact match
    /// - `err.is("PHONE_NUMBER_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        let Self::Rejected { name, .. } = self else { return false };
        if let Some(prefix) = pattern.strip_suffix('*') {
            name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            name.ends_with(suffix)
        } else {
            name == pattern
        }
    }
}

// ─── StoreError ───────────────────────────────────────────────────────────────

/// A credential store write did not durably commit.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("session store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("session store write could not be verified: {0}")]
    Verify(String),
}

// ─── GatewayError ─────────────────────────────────────────────────────────────

/// The error type returned by every session-manager operation and handler.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    InvalidInput(#[from] ValidationError),
    #[error("invalid session blob: {0}")]
    InvalidSessionBlob(String),
    #[error("session not found for {0}, please authenticate first")]
    SessionNotFound(PhoneNumber),
    #[error("no active authentication session found for {0}, please restart the authentication process")]
    NoActiveSession(PhoneNumber),
    #[error("invalid authentication code: {0}")]
    InvalidCode(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("too many requests, please wait {seconds} seconds")]
    RateLimited { seconds: u64 },
    #[error("failed to connect Telegram client: {0}")]
    ConnectionFailed(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("{0}")]
    NotFound(String),
    #[error("failed to save session information: {0}")]
    Persistence(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Transport-neutral error class, mapped to a status code by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    RateLimited,
    Internal,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_)
            | Self::InvalidSessionBlob(_)
            | Self::NoActiveSession(_)
            | Self::InvalidCode(_)
            | Self::AuthenticationFailed(_)
            | Self::ConnectionFailed(_) => ErrorKind::BadRequest,
            Self::SessionNotFound(_) | Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Upstream(_) | Self::Persistence(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to API callers. Internal failures are summarised;
    /// their detail only goes to the server log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Persistence(_) => "Failed to save session information".to_string(),
            Self::Upstream(_)    => "Telegram request failed".to_string(),
            Self::Internal(_)    => "Internal server error".to_string(),
            other                => other.to_string(),
        }
    }

    /// Seconds the caller should wait, for [`GatewayError::RateLimited`].
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { seconds } => Some(*seconds),
            _ => None,
        }
    }
}

impl From<ProtocolError> for GatewayError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Connection(msg)          => Self::ConnectionFailed(msg),
            ProtocolError::RateLimited { seconds }  => Self::RateLimited { seconds },
            ref r if r.is("PHONE_NUMBER_*")         => Self::InvalidInput(ValidationError::Field(
                format!("phone number rejected by Telegram: {r}"),
            )),
            other                                   => Self::Upstream(other.to_string()),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
