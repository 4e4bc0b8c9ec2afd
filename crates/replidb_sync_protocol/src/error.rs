//! Error types for the replication protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding, or sequencing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A message arrived that the current session state cannot accept.
    #[error("unexpected message '{message_type}' in state {state}")]
    UnexpectedMessage {
        /// Wire type of the offending message.
        message_type: String,
        /// Session state at the time.
        state: String,
    },

    /// The peer reported an error for one of our messages.
    #[error("peer error for '{message_type}': {error}")]
    Peer {
        /// Wire type of the message the peer rejected.
        message_type: String,
        /// Peer-supplied description.
        error: String,
    },
}

impl ProtocolError {
    /// Creates an unexpected message error.
    pub fn unexpected_message(
        message_type: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self::UnexpectedMessage {
            message_type: message_type.into(),
            state: state.into(),
        }
    }
}
