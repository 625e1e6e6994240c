//! Structural transition checks
//!
//! These catch states the rest of the system should never produce. What
//! happens to a flagged update is decided by the dispatcher's
//! [`TransitionPolicy`](concord_core::TransitionPolicy).

use crate::state::AuthState;
use serde::{Deserialize, Serialize};

/// A structurally impossible transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionIssue {
    /// Authenticated, but no subject id
    AuthenticatedWithoutSubject,
    /// Signing out and loading at the same time
    SignOutWhileLoading,
    /// Started loading although already authenticated
    LoadingWhileAuthenticated,
}

impl TransitionIssue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticatedWithoutSubject => "authenticated-without-subject",
            Self::SignOutWhileLoading => "sign-out-while-loading",
            Self::LoadingWhileAuthenticated => "loading-while-authenticated",
        }
    }
}

impl std::fmt::Display for TransitionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every issue with moving from `previous` to `next`; empty when the move is fine
pub fn validate_transition(previous: &AuthState, next: &AuthState) -> Vec<TransitionIssue> {
    let mut issues = Vec::new();

    if next.is_authenticated() && next.subject_id().is_none() {
        issues.push(TransitionIssue::AuthenticatedWithoutSubject);
    }
    if previous.is_authenticated() && !next.is_authenticated() && next.loading {
        issues.push(TransitionIssue::SignOutWhileLoading);
    }
    if !previous.loading && next.loading && previous.is_authenticated() && next.is_authenticated()
    {
        issues.push(TransitionIssue::LoadingWhileAuthenticated);
    }

    issues
}
