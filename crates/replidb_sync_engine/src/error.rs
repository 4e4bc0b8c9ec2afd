//! Error types for the client sync session.

use replidb_sync_protocol::CloseReason;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the client sync session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol encode/decode failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] replidb_sync_protocol::ProtocolError),

    /// Local database failure while applying remote changes.
    #[error("core error: {0}")]
    Core(#[from] replidb_core::CoreError),

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// The server closed the session for a reason reconnecting cannot fix.
    #[error("session closed: {0:?}")]
    FatalClose(CloseReason),

    /// Operation not valid in the session's current state.
    #[error("invalid session state: {message}")]
    InvalidState {
        /// What was attempted and why it cannot proceed.
        message: String,
    },
}

impl SyncError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}
