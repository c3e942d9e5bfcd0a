//! Error types for the sync engine.

use metricsync_protocol::{ProtocolError, Timestamp};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Server answered with a non-200 status and an error body.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Server-supplied message.
        message: String,
    },

    /// Response body could not be parsed.
    #[error("decode error: {0}")]
    Decode(String),

    /// Protocol message failed to encode or decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Two records from the same source share a timestamp.
    #[error("duplicate timestamp {timestamp} for source {tag:?}")]
    DuplicateTimestamp {
        /// Source tag of the colliding records.
        tag: String,
        /// Shared timestamp.
        timestamp: Timestamp,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Polling was stopped.
    #[error("polling cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the server rejected the session.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Server { status: 401, .. })
    }
}
