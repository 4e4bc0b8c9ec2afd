//! Error types for the sync server.

use replidb_sync_protocol::CloseReason;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while serving replication connections.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Database failure while applying or fetching.
    #[error("core error: {0}")]
    Core(#[from] replidb_core::CoreError),

    /// Message encode/decode failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] replidb_sync_protocol::ProtocolError),

    /// Connection must be closed with the given reason.
    #[error("connection rejected: {0:?}")]
    Rejected(CloseReason),

    /// The referenced connection no longer exists.
    #[error("unknown connection {0}")]
    UnknownConnection(u64),
}
