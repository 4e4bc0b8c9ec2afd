//! Error types for replidb core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
///
/// The taxonomy follows the write path: validation errors are synchronous
/// and never retried; conflicts are retried internally and surface only as
/// [`CoreError::RetriesExhausted`]; storage errors propagate untouched.
/// Permission rejections are *not* errors - they are collected per path as
/// [`crate::entity::WriteIssue`]s while the batch proceeds.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] replidb_storage::StorageError),

    /// Value (de)serialization error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Query references an attribute the schema cannot support.
    #[error("unprepared query: {message}")]
    UnpreparedQuery {
        /// What the query asked for that the schema cannot answer.
        message: String,
    },

    /// Input failed validation before touching storage.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// A conflicted transaction was retried to its attempt limit.
    #[error("transaction conflict persisted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an unprepared query error.
    pub fn unprepared_query(message: impl Into<String>) -> Self {
        Self::UnpreparedQuery {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
