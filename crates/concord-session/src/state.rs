//! Session phase and read-only state view

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    /// No credential
    NoSession,
    /// Credential held and believed valid
    Valid,
    /// A refresh is in flight
    RefreshPending,
    /// Credential lapsed and could not be refreshed
    Expired,
    /// Credential failed integrity checks; sign-in required
    Corrupted,
}

impl SessionPhase {
    /// Whether a credential in this phase may be used
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Valid | Self::RefreshPending)
    }
}

/// Point-in-time view of the session, computed without side effects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Credential held, usable, and not yet expired
    pub is_valid: bool,
    /// Credential expiry (epoch ms)
    pub expires_at: Option<i64>,
    /// Validity left; zero once expired
    pub time_until_expiry: Option<Duration>,
    /// Less validity left than the refresh threshold
    pub needs_refresh: bool,
}

impl SessionState {
    /// State when no credential is held
    pub fn empty() -> Self {
        Self {
            is_valid: false,
            expires_at: None,
            time_until_expiry: None,
            needs_refresh: false,
        }
    }
}
