//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload was not valid JSON for the expected message.
    #[error("invalid {message} payload: {source}")]
    Json {
        /// Name of the message being decoded.
        message: &'static str,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The payload decoded but violated a structural rule.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl ProtocolError {
    pub(crate) fn json(message: &'static str, source: serde_json::Error) -> Self {
        Self::Json { message, source }
    }
}
