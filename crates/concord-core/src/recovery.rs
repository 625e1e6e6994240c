//! Classification-driven recovery strategies
//!
//! A [`RecoveryRegistry`] is an ordered table of patterns. The first pattern
//! whose `can_handle` accepts an error decides how to recover from it.
//! Built-in patterns cover network, credential and backend-unavailable
//! failures; services register their own domain patterns in front of them.

use crate::errors::{CoordinatorError, ErrorClass};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a recovery decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Whether the pattern itself recovered the situation
    pub success: bool,
    /// Whether the caller should retry the failed operation
    pub should_retry: bool,
    /// Whether the session is gone and the user has to sign in again
    pub sign_in_required: bool,
    /// Human readable explanation
    pub message: String,
}

impl RecoveryResult {
    /// Caller should retry
    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_retry: true,
            sign_in_required: false,
            message: message.into(),
        }
    }

    /// Caller should give up
    pub fn give_up(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_retry: false,
            sign_in_required: false,
            message: message.into(),
        }
    }

    /// Caller should give up and end the session
    pub fn sign_in_required(message: impl Into<String>) -> Self {
        Self {
            sign_in_required: true,
            ..Self::give_up(message)
        }
    }
}

/// One entry of the recovery table
pub trait RecoveryPattern: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether this pattern knows how to deal with `error`
    fn can_handle(&self, error: &CoordinatorError) -> bool;

    /// Decide how to recover from `error`
    fn recover(&self, error: &CoordinatorError) -> RecoveryResult;
}

/// Network-class failures: retry
#[derive(Debug, Default)]
pub struct NetworkRecovery;

impl RecoveryPattern for NetworkRecovery {
    fn name(&self) -> &str {
        "network"
    }

    fn can_handle(&self, error: &CoordinatorError) -> bool {
        matches!(error, CoordinatorError::Network { .. })
    }

    fn recover(&self, error: &CoordinatorError) -> RecoveryResult {
        RecoveryResult::retry(format!("network failure, retrying: {error}"))
    }
}

/// Credential-class failures: never retry, re-authentication is required
#[derive(Debug, Default)]
pub struct CredentialRecovery;

impl RecoveryPattern for CredentialRecovery {
    fn name(&self) -> &str {
        "credential"
    }

    fn can_handle(&self, error: &CoordinatorError) -> bool {
        matches!(
            error.class(),
            ErrorClass::Authentication | ErrorClass::Corruption
        )
    }

    fn recover(&self, error: &CoordinatorError) -> RecoveryResult {
        RecoveryResult::give_up(format!("please sign in again: {error}"))
    }
}

/// Backend-unavailable failures: retry with backoff
#[derive(Debug, Default)]
pub struct BackendUnavailableRecovery;

impl RecoveryPattern for BackendUnavailableRecovery {
    fn name(&self) -> &str {
        "backend-unavailable"
    }

    fn can_handle(&self, error: &CoordinatorError) -> bool {
        matches!(
            error,
            CoordinatorError::Unavailable { .. } | CoordinatorError::Storage { .. }
        )
    }

    fn recover(&self, error: &CoordinatorError) -> RecoveryResult {
        RecoveryResult::retry(format!("backend unavailable, backing off: {error}"))
    }
}

/// Ordered recovery pattern table
#[derive(Clone, Default)]
pub struct RecoveryRegistry {
    patterns: Vec<Arc<dyn RecoveryPattern>>,
}

impl RecoveryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in patterns
    pub fn with_builtin_patterns() -> Self {
        let mut registry = Self::new();
        registry.register(NetworkRecovery);
        registry.register(CredentialRecovery);
        registry.register(BackendUnavailableRecovery);
        registry
    }

    /// Append a pattern (checked after those already registered)
    pub fn register(&mut self, pattern: impl RecoveryPattern + 'static) {
        self.patterns.push(Arc::new(pattern));
    }

    /// Insert a pattern ahead of every registered one
    pub fn register_first(&mut self, pattern: impl RecoveryPattern + 'static) {
        self.patterns.insert(0, Arc::new(pattern));
    }

    /// Number of registered patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no patterns are registered
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Run the first matching pattern, or `None` if no pattern matches
    pub fn recover(&self, error: &CoordinatorError) -> Option<RecoveryResult> {
        let pattern = self.patterns.iter().find(|p| p.can_handle(error))?;
        let result = pattern.recover(error);
        debug!(
            pattern = pattern.name(),
            should_retry = result.should_retry,
            sign_in_required = result.sign_in_required,
            "recovery pattern matched"
        );
        Some(result)
    }

    /// Whether `error` should be retried; unmatched errors fall back to their class
    pub fn should_retry(&self, error: &CoordinatorError) -> bool {
        self.recover(error)
            .map(|result| result.should_retry)
            .unwrap_or_else(|| error.class().is_retryable())
    }
}

impl std::fmt::Debug for RecoveryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.patterns.iter().map(|p| p.name().to_string()))
            .finish()
    }
}
