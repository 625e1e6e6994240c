//! Durable key/value store interface

use crate::errors::CoordinatorError;

/// Errors surfaced by a durable store backend
///
/// Callers treat every variant as "store unavailable".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or refused the operation
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Backend-specific detail
        reason: String,
    },
    /// Write exceeded the backend quota
    #[error("store quota exceeded for key {key}")]
    QuotaExceeded {
        /// Key being written
        key: String,
    },
    /// Low level I/O failure
    #[error("store I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { reason } => CoordinatorError::unavailable(reason),
            other => CoordinatorError::storage(other.to_string()),
        }
    }
}

/// Key/value persistence façade that survives context reloads
///
/// All operations are synchronous from the caller's perspective, mirroring
/// origin-scoped web storage.
pub trait DurableStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value stored under `key`
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
