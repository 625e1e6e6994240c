//! UI-facing auth state

use concord_core::{AuthSnapshot, UserFacingError};
use serde::{Deserialize, Serialize};

/// What subscribers see: the synchronized snapshot plus presentation flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Latest accepted snapshot
    pub snapshot: AuthSnapshot,
    /// Session is still being resolved
    pub loading: bool,
    /// Guidance for the user, if something went wrong
    pub error: Option<UserFacingError>,
}

impl AuthState {
    /// Signed out and still loading; the state before the first session check
    pub fn initial() -> Self {
        Self {
            snapshot: AuthSnapshot::signed_out(0, 0),
            loading: true,
            error: None,
        }
    }

    /// Settled state for `snapshot`
    pub fn settled(snapshot: AuthSnapshot) -> Self {
        Self {
            snapshot,
            loading: false,
            error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot.is_authenticated
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.snapshot.subject_id.as_deref()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Whether going from `previous` to `next` must be delivered immediately
pub fn is_critical_change(previous: &AuthState, next: &AuthState) -> bool {
    previous.is_authenticated() != next.is_authenticated()
        || previous.subject_id() != next.subject_id()
        || previous.error.is_some() != next.error.is_some()
}
