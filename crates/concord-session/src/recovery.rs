//! Session-domain recovery pattern
//!
//! Registered ahead of the built-in patterns by
//! [`SessionLifecycleManager::new`](crate::SessionLifecycleManager::new).

use concord_core::{CoordinatorError, RecoveryPattern, RecoveryResult};

const REVOCATION_MARKERS: [&str; 3] = ["revoked", "session not found", "invalid_grant"];

/// The provider no longer knows the session
///
/// Unlike a plain rejection, a revoked or unknown session cannot be carried
/// until the access token lapses: the holder must sign in again.
#[derive(Debug, Default)]
pub struct RevokedSessionRecovery;

impl RevokedSessionRecovery {
    fn is_revocation(message: &str) -> bool {
        let message = message.to_ascii_lowercase();
        REVOCATION_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

impl RecoveryPattern for RevokedSessionRecovery {
    fn name(&self) -> &str {
        "revoked-session"
    }

    fn can_handle(&self, error: &CoordinatorError) -> bool {
        matches!(
            error,
            CoordinatorError::Authentication { message } if Self::is_revocation(message)
        )
    }

    fn recover(&self, error: &CoordinatorError) -> RecoveryResult {
        RecoveryResult::sign_in_required(format!("session revoked by provider: {error}"))
    }
}
