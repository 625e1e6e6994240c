//! Session errors
//!
//! `Clone` so one refresh outcome can be handed to every waiting caller.

use concord_core::{CoordinatorError, ErrorClass, ProviderError};

/// Errors returned by the session lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No credential is held
    #[error("no active session")]
    NoSession,

    /// Identity provider call failed after retries
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Refresh did not finish within its budget
    #[error("credential refresh timed out after {timeout_ms}ms")]
    Timeout {
        /// Budget that elapsed
        timeout_ms: u64,
    },

    /// Credential failed validation but is not corrupted
    #[error("credential invalid: {}", .issues.join("; "))]
    Invalid {
        /// Validation failures
        issues: Vec<String>,
    },

    /// Credential is corrupted; the session was terminated
    #[error("credential corrupted: {}", .issues.join("; "))]
    Corrupted {
        /// Validation failures
        issues: Vec<String>,
    },

    /// Session changed while the refresh was in flight; its result was discarded
    #[error("refresh superseded by a newer session change")]
    Superseded,

    /// Refresh task died before producing a result
    #[error("refresh task failed: {0}")]
    Task(String),
}

impl SessionError {
    /// Classify within the coordinator taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Provider(err) => err.class(),
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::NoSession | Self::Invalid { .. } => ErrorClass::Authentication,
            Self::Corrupted { .. } => ErrorClass::Corruption,
            Self::Superseded => ErrorClass::Conflict,
            Self::Task(_) => ErrorClass::Transient,
        }
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl From<SessionError> for CoordinatorError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Provider(err) => err.into(),
            SessionError::Timeout { timeout_ms } => CoordinatorError::Timeout { timeout_ms },
            SessionError::Corrupted { .. } => CoordinatorError::corruption(err.to_string()),
            SessionError::Task(_) => CoordinatorError::internal(err.to_string()),
            other => CoordinatorError::authentication(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(
            SessionError::Provider(ProviderError::network("x")).class(),
            ErrorClass::Transient
        );
        assert_eq!(SessionError::Timeout { timeout_ms: 1 }.class(), ErrorClass::Timeout);
        assert_eq!(
            SessionError::Corrupted { issues: vec![] }.class(),
            ErrorClass::Corruption
        );
        assert!(!SessionError::Superseded.class().is_retryable());
    }

    #[test]
    fn display_joins_issues() {
        let err = SessionError::Invalid {
            issues: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "credential invalid: a; b");
    }
}
