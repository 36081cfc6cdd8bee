use std::time::Duration;

use thiserror::Error;

use crate::model::TestReference;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failure talking to the remote service at the HTTP level.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to send request to {url}")]
    Send {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to read response from {url}")]
    Read {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("unable to build HTTP client")]
    Client(#[source] BoxError),
}

/// Errors surfaced by [`crate::TestSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service rejected the submission. The partially decoded reference
    /// still carries `credits_left`.
    #[error("GTmetrix rejected the test: {message}")]
    Remote {
        message: String,
        reference: Box<TestReference>,
    },

    #[error("no terminal state after {waited:?} ({attempts} polls)")]
    Timeout { waited: Duration, attempts: u32 },

    #[error("wait cancelled after {attempts} polls")]
    Cancelled { attempts: u32 },

    /// Only produced under [`crate::config::DecodePolicy::Strict`].
    #[error("malformed {what} payload")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid test reference: {0}")]
    InvalidReference(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Partial reference attached to a remote rejection.
    pub fn reference(&self) -> Option<&TestReference> {
        match self {
            SessionError::Remote { reference, .. } => Some(reference),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled { .. })
    }
}
