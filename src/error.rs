//! Unified error handling for schema, record, and duplicate operations.

use thiserror::Error;

/// Every fallible operation in the crate returns this error.
///
/// The first four variants carry domain meaning and map onto caller
/// decisions (404 vs 422 vs 409 at an API edge); the last two wrap the
/// storage and serialization layers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A module, block, field, record, rule, or candidate does not exist
    /// (or is soft-deleted and therefore invisible).
    #[error("not found: {0}")]
    NotFound(String),

    /// Input failed schema or value validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation collides with current state: a taken api name, or a
    /// transition out of a terminal candidate status.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A merge transaction was aborted before completion; nothing was
    /// written.
    #[error("merge failed: {0}")]
    MergeFailed(String),

    /// Underlying sled failure.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Entity encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        CoreError::NotFound(format!("{} {}", entity, id))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict(message.into())
    }
}

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Unwraps transaction aborts back into the domain error they carry.
impl From<sled::transaction::TransactionError<CoreError>> for CoreError {
    fn from(err: sled::transaction::TransactionError<CoreError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => CoreError::Storage(e),
        }
    }
}
