//! Session lifecycle tests against a scripted provider
//!
//! Wall-clock expiry runs on a [`ManualClock`]; timers (provider latency,
//! refresh timeouts, periodic checks) run on tokio's paused clock.

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use concord_core::{
    AuthEvent, AuthSnapshot, CoordinatorConfig, ContextId, ErrorClass, EventBus, ProviderError, ProviderEvent,
    RecoveryRegistry, RetryPolicy, SyncConfig,
};
use concord_effects::{MemoryChannelHub, MemoryStore};
use concord_session::{SessionError, SessionLifecycleManager, SessionPhase};
use concord_sync::StateSynchronizer;
use concord_testkit::{credential_for, init_test_tracing, ManualClock, MockIdentityProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_700_000_000_000;

struct Harness {
    manager: SessionLifecycleManager,
    provider: Arc<MockIdentityProvider>,
    sync: StateSynchronizer,
    clock: Arc<ManualClock>,
    seen: Arc<Mutex<Vec<AuthEvent>>>,
}

impl Harness {
    fn new() -> Self {
        init_test_tracing();
        let clock = Arc::new(ManualClock::new(NOW));
        let provider = Arc::new(MockIdentityProvider::new());
        let hub = MemoryChannelHub::new();
        let events = EventBus::new();
        let sync = StateSynchronizer::new(
            ContextId::new(),
            SyncConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(hub.endpoint()),
            clock.clone(),
            events.clone(),
            RetryPolicy::none(),
            RecoveryRegistry::with_builtin_patterns(),
        );
        let manager = SessionLifecycleManager::new(
            CoordinatorConfig::for_testing().session,
            provider.clone(),
            sync.clone(),
            clock.clone(),
            events.clone(),
            RetryPolicy::none(),
            RecoveryRegistry::with_builtin_patterns(),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe(move |event: &AuthEvent| sink.lock().push(event.clone()));

        Self {
            manager,
            provider,
            sync,
            clock,
            seen,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        self.seen.lock().iter().map(AuthEvent::name).collect()
    }

    fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_share_one_provider_call() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();

    h.provider.set_delay(Duration::from_millis(200));
    h.provider
        .set_refresh_result(Ok(credential_for("u1", NOW, minutes(60))));

    let (a, b, c) = tokio::join!(
        h.manager.refresh(),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.manager.refresh().await
        },
        async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            h.manager.refresh().await
        },
    );

    assert_eq!(h.provider.refresh_calls(), 1);
    let a = a.unwrap();
    assert_eq!(b.unwrap(), a);
    assert_eq!(c.unwrap(), a);
    assert_eq!(a.expires_at_ms, NOW + 3_600_000);
    assert_eq!(h.count("session-refreshed"), 1);
    assert_eq!(h.manager.phase(), SessionPhase::Valid);
    assert_eq!(h.sync.current().credential_expiry_epoch_ms, Some(NOW + 3_600_000));
}

#[tokio::test(start_paused = true)]
async fn refresh_after_completion_starts_a_new_flight() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    h.provider
        .set_refresh_result(Ok(credential_for("u1", NOW, minutes(60))));

    h.manager.refresh().await.unwrap();
    h.manager.refresh().await.unwrap();

    assert_eq!(h.provider.refresh_calls(), 2);
    assert!(!h.manager.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_live_credential() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    h.provider
        .set_refresh_result(Err(ProviderError::unauthorized("refresh rejected")));

    let err = h.manager.refresh().await.unwrap_err();
    assert_matches!(err, SessionError::Provider(ProviderError::Unauthorized { .. }));

    assert_eq!(h.manager.phase(), SessionPhase::Valid);
    assert!(h.manager.get_state().is_valid);
    assert!(h.sync.current().is_authenticated);
    assert!(h.seen.lock().iter().any(|event| matches!(
        event,
        AuthEvent::RefreshFailed {
            class: ErrorClass::Authentication,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_of_lapsed_credential_expires_session() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(1)))
        .await
        .unwrap();
    h.clock.advance(minutes(2));
    h.provider
        .set_refresh_result(Err(ProviderError::network("offline")));

    assert!(h.manager.refresh().await.is_err());
    assert_eq!(h.manager.phase(), SessionPhase::Expired);

    let state = h.manager.get_state();
    assert!(!state.is_valid);
    assert_eq!(state.time_until_expiry, Some(Duration::ZERO));
    assert!(state.needs_refresh);
}

#[tokio::test(start_paused = true)]
async fn repeated_timeouts_escalate_to_corruption() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    h.provider.set_delay(Duration::from_secs(5));
    h.provider
        .set_refresh_result(Ok(credential_for("u1", NOW, minutes(60))));

    let first = h.manager.refresh().await.unwrap_err();
    assert_eq!(first, SessionError::Timeout { timeout_ms: 1_000 });
    assert_eq!(h.manager.phase(), SessionPhase::Valid);

    let second = h.manager.refresh().await.unwrap_err();
    assert_matches!(second, SessionError::Corrupted { .. });
    assert_eq!(h.manager.phase(), SessionPhase::Corrupted);
    assert!(!h.sync.current().is_authenticated);
    assert_eq!(h.count("refresh-failed"), 2);
}

#[tokio::test(start_paused = true)]
async fn sign_out_supersedes_in_flight_refresh() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    h.provider.set_delay(Duration::from_millis(200));
    h.provider
        .set_refresh_result(Ok(credential_for("u1", NOW, minutes(60))));

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.refresh().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.manager.sign_out().await;

    assert_eq!(pending.await.unwrap(), Err(SessionError::Superseded));
    assert_eq!(h.manager.phase(), SessionPhase::NoSession);
    assert_eq!(h.manager.get_state().expires_at, None);
    assert!(!h.sync.current().is_authenticated);
    assert_eq!(h.count("session-refreshed"), 0);
}

#[tokio::test(start_paused = true)]
async fn revoked_session_signs_out_instead_of_lingering() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    h.provider
        .set_refresh_result(Err(ProviderError::unauthorized("refresh token revoked")));

    let err = h.manager.refresh().await.unwrap_err();
    assert_matches!(err, SessionError::Provider(ProviderError::Unauthorized { .. }));

    assert_eq!(h.manager.phase(), SessionPhase::NoSession);
    assert_eq!(h.manager.get_state().expires_at, None);
    assert!(!h.sync.current().is_authenticated);
    assert_eq!(h.provider.refresh_calls(), 1);
    assert!(h.seen.lock().iter().any(|event| matches!(
        event,
        AuthEvent::InvalidSession {
            corruption: false,
            ..
        }
    )));
}

#[tokio::test]
async fn refresh_without_session_is_rejected() {
    let h = Harness::new();
    assert_eq!(h.manager.refresh().await, Err(SessionError::NoSession));
    assert_eq!(h.provider.refresh_calls(), 0);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn malformed_token_is_never_published() {
    let h = Harness::new();
    let mut credential = credential_for("u1", NOW, minutes(60));
    credential.access_token = "abc.def".to_string();

    let err = h.manager.establish(credential).await.unwrap_err();
    assert_matches!(err, SessionError::Corrupted { .. });
    assert_eq!(h.manager.phase(), SessionPhase::Corrupted);
    assert!(!h.sync.current().is_authenticated);
    assert!(h.seen.lock().iter().any(|event| matches!(
        event,
        AuthEvent::InvalidSession {
            corruption: true,
            ..
        }
    )));

    assert_matches!(
        h.manager.refresh().await,
        Err(SessionError::Corrupted { .. })
    );
    assert_eq!(h.provider.refresh_calls(), 0);
}

#[tokio::test]
async fn expired_credential_is_refused_without_corruption() {
    let h = Harness::new();
    let credential = credential_for("u1", NOW - 7_200_000, minutes(60));

    let err = h.manager.establish(credential).await.unwrap_err();
    assert_matches!(err, SessionError::Invalid { .. });
    assert_eq!(h.manager.phase(), SessionPhase::NoSession);
    assert!(h.seen.lock().iter().any(|event| matches!(
        event,
        AuthEvent::InvalidSession {
            corruption: false,
            ..
        }
    )));
}

#[tokio::test]
async fn validate_with_details_reports_without_side_effects_when_healthy() {
    let h = Harness::new();
    assert_eq!(h.manager.validate_with_details().await.issues, vec!["no active session"]);

    h.manager
        .establish(credential_for("u1", NOW, minutes(60)))
        .await
        .unwrap();
    let result = h.manager.validate_with_details().await;
    assert!(result.is_valid(), "{:?}", result.issues);
    assert_eq!(h.count("invalid-session"), 0);
}

// =============================================================================
// Snapshot publication
// =============================================================================

#[tokio::test]
async fn profile_flag_survives_same_subject_refresh() {
    let h = Harness::new();
    assert_eq!(
        h.manager.mark_profile_loaded().await,
        Err(SessionError::NoSession)
    );

    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    h.manager.mark_profile_loaded().await.unwrap();
    assert!(h.sync.current().profile_loaded);

    h.provider
        .set_refresh_result(Ok(credential_for("u1", NOW, minutes(60))));
    h.manager.refresh().await.unwrap();

    let snapshot = h.sync.current();
    assert!(snapshot.profile_loaded);
    assert_eq!(snapshot.subject_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn new_subject_resets_profile_flag() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(60)))
        .await
        .unwrap();
    h.manager.mark_profile_loaded().await.unwrap();
    let before = h.sync.current().version;

    h.manager
        .establish(credential_for("u2", NOW, minutes(60)))
        .await
        .unwrap();

    let snapshot = h.sync.current();
    assert_eq!(snapshot.subject_id.as_deref(), Some("u2"));
    assert!(!snapshot.profile_loaded);
    assert!(snapshot.version > before);
}

// =============================================================================
// Shared snapshot changes from other contexts
// =============================================================================

#[tokio::test]
async fn sign_out_elsewhere_drops_credential_without_publishing() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    let signed_out = h.sync.current().signed_out_successor(NOW + 10);

    h.sync
        .on_remote_message(signed_out.clone(), ContextId::new(), NOW + 10)
        .await;

    assert_eq!(h.manager.phase(), SessionPhase::NoSession);
    assert_eq!(h.manager.get_state().expires_at, None);
    assert_eq!(h.manager.refresh().await, Err(SessionError::NoSession));
    assert_eq!(h.provider.refresh_calls(), 0);
    assert_eq!(h.sync.current(), signed_out);
}

#[tokio::test]
async fn other_subject_elsewhere_drops_credential() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(60)))
        .await
        .unwrap();
    let current = h.sync.current();
    let other =
        current.authenticated_successor("u2", "u2@example.com", NOW + 3_600_000, NOW + 10);

    h.sync
        .on_remote_message(other.clone(), ContextId::new(), NOW + 10)
        .await;

    assert_eq!(h.manager.phase(), SessionPhase::NoSession);
    assert_eq!(h.sync.current(), other);
    assert_eq!(
        h.manager.mark_profile_loaded().await,
        Err(SessionError::NoSession)
    );
}

#[tokio::test]
async fn same_subject_update_elsewhere_keeps_credential() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(60)))
        .await
        .unwrap();
    let mut loaded: AuthSnapshot = h.sync.current().successor(NOW + 10);
    loaded.profile_loaded = true;

    h.sync
        .on_remote_message(loaded, ContextId::new(), NOW + 10)
        .await;

    assert_eq!(h.manager.phase(), SessionPhase::Valid);
    assert!(h.manager.get_state().is_valid);
}

#[tokio::test(start_paused = true)]
async fn sign_out_elsewhere_supersedes_in_flight_refresh() {
    let h = Harness::new();
    h.manager
        .establish(credential_for("u1", NOW, minutes(20)))
        .await
        .unwrap();
    h.provider.set_delay(Duration::from_millis(200));
    h.provider
        .set_refresh_result(Ok(credential_for("u1", NOW, minutes(60))));

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.refresh().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let signed_out = h.sync.current().signed_out_successor(NOW + 10);
    h.sync
        .on_remote_message(signed_out, ContextId::new(), NOW + 10)
        .await;

    assert_eq!(pending.await.unwrap(), Err(SessionError::Superseded));
    assert!(!h.sync.current().is_authenticated);
    assert_eq!(h.count("session-refreshed"), 0);
}

// =============================================================================
// Background tasks
// =============================================================================

#[tokio::test(start_paused = true)]
async fn periodic_check_warns_then_expires() {
    let h = Harness::new();
    h.provider
        .set_current_session(Ok(Some(credential_for("u1", NOW, minutes(5)))));
    h.provider
        .set_refresh_result(Err(ProviderError::unauthorized("refresh rejected")));

    let state = h.manager.initialize().await.unwrap();
    assert!(state.is_valid);
    assert!(state.needs_refresh);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.count("session-warning") >= 1);
    assert_eq!(h.count("session-expired"), 0);
    assert_eq!(h.manager.phase(), SessionPhase::Valid);

    h.clock.advance(minutes(6));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.count("session-expired") >= 1);
    assert_eq!(h.manager.phase(), SessionPhase::Expired);

    h.manager.cleanup();
}

#[tokio::test(start_paused = true)]
async fn provider_sign_out_ends_session() {
    let h = Harness::new();
    h.provider
        .set_current_session(Ok(Some(credential_for("u1", NOW, minutes(60)))));
    h.manager.initialize().await.unwrap();
    assert!(h.sync.current().is_authenticated);

    h.provider.emit(ProviderEvent::SignedOut);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.manager.phase(), SessionPhase::NoSession);
    assert!(!h.sync.current().is_authenticated);
    assert_eq!(h.count("signed-out"), 1);
    h.manager.cleanup();
}

#[tokio::test(start_paused = true)]
async fn provider_credential_change_is_adopted() {
    let h = Harness::new();
    h.manager.initialize().await.unwrap();
    assert_eq!(h.manager.phase(), SessionPhase::NoSession);

    h.provider.emit(ProviderEvent::CredentialChanged(credential_for(
        "u7",
        NOW,
        minutes(60),
    )));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.manager.phase(), SessionPhase::Valid);
    assert_eq!(h.sync.current().subject_id.as_deref(), Some("u7"));
    h.manager.cleanup();
}

#[tokio::test]
async fn initialize_reports_provider_failure() {
    let h = Harness::new();
    h.provider
        .set_current_session(Err(ProviderError::unauthorized("expired refresh token")));

    let err = h.manager.initialize().await.unwrap_err();
    assert_matches!(err, SessionError::Provider(_));
    assert_eq!(h.count("refresh-failed"), 1);
    h.manager.cleanup();
}
