//! Error types for the storage layer.

use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the storage layer.
///
/// Backend I/O failures propagate as-is; no retry happens at this layer.
/// [`StorageError::Conflict`] is the one variant callers are expected to
/// recover from, by retrying the whole transaction.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error from a backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Value or log record could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A concurrently committed transaction wrote inside this
    /// transaction's read bounds.
    #[error("transaction conflict: {tx_id}")]
    Conflict {
        /// The transaction that lost the race.
        tx_id: Uuid,
    },

    /// The requested backend is declared but not implemented by this build.
    #[error("unsupported storage backend: {name}")]
    UnsupportedBackend {
        /// The backend selector that was requested.
        name: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// The storage file is locked by another process.
    #[error("storage file locked: another process has exclusive access")]
    Locked,

    /// The backend log is corrupted or truncated.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl StorageError {
    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unsupported backend error.
    pub fn unsupported_backend(name: impl Into<String>) -> Self {
        Self::UnsupportedBackend { name: name.into() }
    }

    /// Returns true if retrying the enclosing transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
