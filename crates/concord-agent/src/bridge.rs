//! Composition of the UI-facing state
//!
//! The synchronizer supplies the snapshot; lifecycle events supply the
//! `error` flag; the runtime clears `loading` once startup settles. Each
//! change republishes the composed [`AuthState`] to the dispatcher.

use concord_core::{AuthEvent, AuthSnapshot, UserFacingError};
use concord_dispatch::{AuthState, UpdateDispatcher};
use parking_lot::Mutex;
use tracing::debug;

pub(crate) struct StateBridge {
    dispatcher: UpdateDispatcher,
    state: Mutex<AuthState>,
}

impl StateBridge {
    pub(crate) fn new(dispatcher: UpdateDispatcher) -> Self {
        let state = dispatcher.current_state();
        Self {
            dispatcher,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn on_snapshot(&self, snapshot: &AuthSnapshot) {
        self.apply(|state| {
            // A different principal signing in starts with a clean slate.
            if snapshot.is_authenticated && !state.snapshot.same_subject(snapshot) {
                state.error = None;
            }
            state.snapshot = snapshot.clone();
        });
    }

    pub(crate) fn on_event(&self, event: &AuthEvent) {
        let error = match event {
            AuthEvent::RefreshFailed { error, class } => {
                match UserFacingError::from_class(*class, error.clone()) {
                    Some(error) => Some(error),
                    None => return,
                }
            }
            AuthEvent::InvalidSession {
                corruption: true, ..
            } => Some(UserFacingError::SignInAgain {
                message: "your session could not be verified; please sign in again".into(),
            }),
            AuthEvent::SessionExpired => Some(UserFacingError::SignInAgain {
                message: "your session has expired; please sign in again".into(),
            }),
            AuthEvent::SessionRefreshed { .. } | AuthEvent::SignedOut => None,
            // Diagnostics only.
            _ => return,
        };
        debug!(event = event.name(), has_error = error.is_some(), "lifecycle event reflected in auth state");
        self.apply(|state| state.error = error);
    }

    /// Startup finished; stop reporting `loading`
    pub(crate) fn settle(&self) {
        self.apply(|state| state.loading = false);
    }

    fn apply(&self, change: impl FnOnce(&mut AuthState)) {
        let next = {
            let mut state = self.state.lock();
            change(&mut state);
            state.clone()
        };
        // Published outside the lock: subscriber callbacks may re-enter.
        self.dispatcher.publish(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{DispatchConfig, ErrorClass};

    fn bridge() -> StateBridge {
        StateBridge::new(UpdateDispatcher::new(DispatchConfig::default()))
    }

    #[test]
    fn transient_refresh_failure_asks_for_retry() {
        let bridge = bridge();
        bridge.on_event(&AuthEvent::RefreshFailed {
            error: "network failure: offline".into(),
            class: ErrorClass::Transient,
        });
        assert!(matches!(
            bridge.dispatcher.current_state().error,
            Some(UserFacingError::Retry { .. })
        ));

        bridge.on_event(&AuthEvent::SessionRefreshed { expires_at_ms: 1 });
        assert_eq!(bridge.dispatcher.current_state().error, None);
    }

    #[test]
    fn corruption_asks_for_sign_in_but_plain_invalidity_does_not() {
        let bridge = bridge();
        bridge.on_event(&AuthEvent::InvalidSession {
            corruption: false,
            issues: vec!["credential has expired".into()],
        });
        assert_eq!(bridge.dispatcher.current_state().error, None);

        bridge.on_event(&AuthEvent::InvalidSession {
            corruption: true,
            issues: vec!["access token has 2 segments, expected 3".into()],
        });
        assert!(matches!(
            bridge.dispatcher.current_state().error,
            Some(UserFacingError::SignInAgain { .. })
        ));
    }

    #[test]
    fn new_subject_clears_error() {
        let bridge = bridge();
        bridge.on_event(&AuthEvent::SessionExpired);
        bridge.on_snapshot(&AuthSnapshot::authenticated("u2", "u2@example.com", 10, 1, 1));

        let state = bridge.dispatcher.current_state();
        assert_eq!(state.error, None);
        assert_eq!(state.subject_id(), Some("u2"));
    }
}
