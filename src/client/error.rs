//! Error taxonomy for the server client.
//!
//! Three families with different handling policies:
//! - [`AuthError`]: terminal for the current credential set, surfaced to the
//!   operator, never retried automatically beyond a single re-auth attempt.
//! - [`TransportError`]: transient, absorbed into the health monitor's
//!   failure count; the next poll tick is the retry.
//! - [`CommandError`]: per-command, surfaced as a failed command to the host
//!   runtime, never crashes the reconciliation loop.

use thiserror::Error;

/// Authentication failures
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("server requires a two-factor code")]
    TwoFactorRequired,

    #[error("server unreachable: {0}")]
    ServerUnreachable(String),

    #[error("server version {found} is below the supported minimum {minimum}")]
    ServerTooOld { found: String, minimum: String },
}

/// Transient transport failures during polling/probing
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    /// The token was rejected. The caller decides whether to re-authenticate;
    /// this is never retried internally.
    #[error("unauthorized")]
    Unauthorized,

    #[error("server unreachable: {0}")]
    Unreachable(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

/// Per-command failures
#[derive(Debug, Error)]
pub enum CommandError {
    /// The target session no longer exists on the server
    #[error("session gone")]
    SessionGone,

    /// The entity has no live session mapped (idle/retired binding)
    #[error("no active session for entity")]
    NoActiveSession,

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("server unreachable: {0}")]
    Unreachable(String),
}

impl From<reqwest::Error> for CommandError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unreachable(e.to_string())
    }
}
