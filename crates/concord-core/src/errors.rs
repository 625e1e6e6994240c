//! Unified error system for Concord
//!
//! One error type crosses crate boundaries. Each variant maps onto one class of
//! the coordinator's error taxonomy (see [`ErrorClass`]), which is what the
//! recovery registry and the UI-facing error view key off.

use serde::{Deserialize, Serialize};

/// Error taxonomy shared by the recovery layer and lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Network or provider hiccup, retryable
    Transient,
    /// Identity provider refused the credential; the user must sign in again
    Authentication,
    /// Divergent snapshots across contexts, auto-resolved
    Conflict,
    /// Structurally invalid credential or snapshot, terminal
    Corruption,
    /// Operation exceeded its time budget
    Timeout,
}

impl ErrorClass {
    /// Whether an operation failing with this class may be retried
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Timeout)
    }
}

/// Unified error type for Concord operations
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum CoordinatorError {
    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Network or transport error
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// Identity provider rejected the credential
    #[error("Authentication required: {message}")]
    Authentication {
        /// Error message from the provider
        message: String,
    },

    /// Backend (provider or store) is temporarily unavailable
    #[error("Backend unavailable: {message}")]
    Unavailable {
        /// Error message describing the outage
        message: String,
    },

    /// Storage operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Credential or snapshot failed structural validation
    #[error("Corruption detected: {message}")]
    Corruption {
        /// Error message describing what was corrupted
        message: String,
    },

    /// Operation timed out
    #[error("Timed out after {timeout_ms}ms")]
    Timeout {
        /// Budget that was exceeded
        timeout_ms: u64,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl CoordinatorError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a backend-unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error within the coordinator taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. } | Self::Unavailable { .. } | Self::Storage { .. } => {
                ErrorClass::Transient
            }
            Self::Authentication { .. } => ErrorClass::Authentication,
            Self::Invalid { .. } | Self::Serialization { .. } | Self::Corruption { .. } => {
                ErrorClass::Corruption
            }
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Internal { .. } => ErrorClass::Transient,
        }
    }
}

/// Standard Result type for Concord operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

/// What the UI layer is told when something goes wrong
///
/// Conflicts never reach this type; they are resolved internally and only
/// show up on the diagnostics event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum UserFacingError {
    /// Authentication required or credential corrupted
    SignInAgain {
        /// Human readable detail
        message: String,
    },
    /// Transient failure, retrying may help
    Retry {
        /// Human readable detail
        message: String,
    },
}

impl UserFacingError {
    /// Map an error class onto the guidance shown to the user
    pub fn from_class(class: ErrorClass, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        match class {
            ErrorClass::Authentication | ErrorClass::Corruption => {
                Some(Self::SignInAgain { message })
            }
            ErrorClass::Transient | ErrorClass::Timeout => Some(Self::Retry { message }),
            ErrorClass::Conflict => None,
        }
    }

    /// Message carried by this error
    pub fn message(&self) -> &str {
        match self {
            Self::SignInAgain { message } | Self::Retry { message } => message,
        }
    }
}
