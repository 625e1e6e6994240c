//! Session lifecycle manager
//!
//! # Concurrency
//!
//! A refresh is never cancelled once the provider call starts. Instead every
//! change of session identity (establish, sign-out, corruption, cleanup) bumps
//! a generation counter, and a refresh whose generation is stale when it
//! finishes discards its result.
//!
//! Background work (the periodic check and the provider event listener) holds
//! only a weak reference to the manager, so dropping every handle ends it.
//!
//! # Other contexts
//!
//! The manager observes the synchronizer. When the shared snapshot stops
//! naming the subject this context holds a credential for (another context
//! signed out, or signed in as someone else) the credential is dropped and
//! nothing is published in response. A refresh in flight for it is superseded.

use crate::error::SessionError;
use crate::flight::SingleFlight;
use crate::recovery::RevokedSessionRecovery;
use crate::state::{SessionPhase, SessionState};
use crate::validation::{validate_credential, ValidationResult};
use concord_core::{
    with_timeout, AuthEvent, AuthSnapshot, CoordinatorError, Credential, EventBus,
    IdentityProvider, PhysicalClock, ProviderError, ProviderEvent, RecoveryRegistry,
    ReliabilityError, RetryPolicy, SessionConfig,
};
use concord_effects::TaskRegistry;
use concord_sync::StateSynchronizer;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

struct SessionInner {
    config: SessionConfig,
    provider: Arc<dyn IdentityProvider>,
    sync: StateSynchronizer,
    clock: Arc<dyn PhysicalClock>,
    events: EventBus<AuthEvent>,
    retry: RetryPolicy,
    recovery: RecoveryRegistry,
    credential: RwLock<Option<Credential>>,
    phase: RwLock<SessionPhase>,
    flight: SingleFlight<Credential, SessionError>,
    generation: AtomicU64,
    consecutive_timeouts: AtomicU32,
    tasks: Mutex<Option<TaskRegistry>>,
}

/// Owns the credential and drives its lifecycle
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionLifecycleManager {
    inner: Arc<SessionInner>,
}

impl SessionLifecycleManager {
    /// Create a manager with no session
    ///
    /// Registers [`RevokedSessionRecovery`] ahead of the patterns in
    /// `recovery` and starts following `sync`.
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn IdentityProvider>,
        sync: StateSynchronizer,
        clock: Arc<dyn PhysicalClock>,
        events: EventBus<AuthEvent>,
        retry: RetryPolicy,
        mut recovery: RecoveryRegistry,
    ) -> Self {
        recovery.register_first(RevokedSessionRecovery);
        let manager = Self {
            inner: Arc::new(SessionInner {
                config,
                provider,
                sync,
                clock,
                events,
                retry,
                recovery,
                credential: RwLock::new(None),
                phase: RwLock::new(SessionPhase::NoSession),
                flight: SingleFlight::new(),
                generation: AtomicU64::new(0),
                consecutive_timeouts: AtomicU32::new(0),
                tasks: Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&manager.inner);
        manager
            .inner
            .sync
            .add_observer(Arc::new(move |snapshot: &AuthSnapshot| {
                if let Some(inner) = weak.upgrade() {
                    SessionLifecycleManager { inner }.on_shared_snapshot(snapshot);
                }
            }));
        manager
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.read()
    }

    /// Point-in-time view of the session; never changes state
    pub fn get_state(&self) -> SessionState {
        let phase = self.phase();
        let credential = self.inner.credential.read();
        let Some(credential) = credential.as_ref() else {
            return SessionState::empty();
        };

        let remaining_ms = credential.time_until_expiry_ms(self.inner.clock.now_ms());
        let time_until_expiry = std::time::Duration::from_millis(remaining_ms.max(0) as u64);
        SessionState {
            is_valid: phase.is_usable() && remaining_ms > 0,
            expires_at: Some(credential.expires_at_ms),
            time_until_expiry: Some(time_until_expiry),
            needs_refresh: time_until_expiry < self.inner.config.refresh_threshold(),
        }
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.flight.is_running()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Adopt the provider's current session and start background checks
    ///
    /// Background tasks start even when loading the session fails, so a later
    /// provider sign-in event is still picked up.
    pub async fn initialize(&self) -> Result<SessionState, SessionError> {
        let provider = self.inner.provider.clone();
        let recovery = self.inner.recovery.clone();
        let current = self
            .inner
            .retry
            .execute_if(
                "current-session",
                || {
                    let provider = provider.clone();
                    async move { provider.current_session().await }
                },
                |err: &ProviderError| recovery.should_retry(&CoordinatorError::from(err.clone())),
            )
            .await;

        let outcome = match current {
            Ok(Some(credential)) => self.establish(credential).await,
            Ok(None) => {
                debug!("provider reports no active session");
                Ok(())
            }
            Err(err) => {
                let err = SessionError::from(err);
                self.emit_refresh_failed(&err);
                Err(err)
            }
        };

        self.start_background_tasks();
        outcome.map(|()| self.get_state())
    }

    /// Sign in with `credential`
    ///
    /// Supersedes any refresh in flight for the previous credential.
    pub async fn establish(&self, credential: Credential) -> Result<(), SessionError> {
        let result = validate_credential(&credential, self.inner.clock.now_ms(), &self.inner.config);
        if result.is_corrupted() {
            self.mark_corrupted(result.issues.clone()).await;
            return Err(SessionError::Corrupted {
                issues: result.issues,
            });
        }
        if !result.is_valid() {
            self.inner.events.emit(&AuthEvent::InvalidSession {
                corruption: false,
                issues: result.issues.clone(),
            });
            return Err(SessionError::Invalid {
                issues: result.issues,
            });
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.consecutive_timeouts.store(0, Ordering::SeqCst);
        let subject = credential.subject.clone();
        let expires_at_ms = credential.expires_at_ms;
        *self.inner.credential.write() = Some(credential);
        *self.inner.phase.write() = SessionPhase::Valid;

        if !self
            .publish_session(&subject.id, &subject.email, expires_at_ms, generation)
            .await
        {
            debug!(subject = %subject.id, "sign-in overtaken by another context");
            return Err(SessionError::Superseded);
        }
        info!(subject = %subject.id, expires_at_ms, "session established");
        Ok(())
    }

    /// Record that profile data for the signed-in subject has been loaded
    pub async fn mark_profile_loaded(&self) -> Result<(), SessionError> {
        if self.inner.credential.read().is_none() {
            return Err(SessionError::NoSession);
        }
        self.inner
            .sync
            .update(|current, now| {
                if !current.is_authenticated || current.profile_loaded {
                    return None;
                }
                let mut next = current.successor(now);
                next.profile_loaded = true;
                Some(next)
            })
            .await;
        Ok(())
    }

    /// Drop the credential and sign every context out
    pub async fn sign_out(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let had_session = self.inner.credential.write().take().is_some();
        *self.inner.phase.write() = SessionPhase::NoSession;
        self.inner.consecutive_timeouts.store(0, Ordering::SeqCst);

        self.inner.sync.clear().await;
        self.inner.events.emit(&AuthEvent::SignedOut);
        info!(had_session, "signed out");
    }

    /// Stop background tasks and orphan any in-flight refresh
    pub fn cleanup(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(tasks) = self.inner.tasks.lock().take() {
            tasks.shutdown();
        }
        debug!("session lifecycle manager cleaned up");
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Exchange the refresh token for a new credential
    ///
    /// Concurrent calls share one provider call and its result.
    pub async fn refresh(&self) -> Result<Credential, SessionError> {
        let this = self.clone();
        let (outcome, leader) = self
            .inner
            .flight
            .run(move || async move { this.run_refresh().await })
            .await;
        if !leader {
            debug!(ok = outcome.is_ok(), "joined in-flight refresh");
        }
        outcome
    }

    async fn run_refresh(&self) -> Result<Credential, SessionError> {
        {
            let mut phase = self.inner.phase.write();
            match *phase {
                SessionPhase::NoSession => return Err(SessionError::NoSession),
                SessionPhase::Corrupted => {
                    return Err(SessionError::Corrupted {
                        issues: vec!["session is corrupted; sign in again".to_string()],
                    })
                }
                _ => *phase = SessionPhase::RefreshPending,
            }
        }

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let budget = self.inner.config.refresh_timeout();
        let provider = self.inner.provider.clone();
        let recovery = self.inner.recovery.clone();
        let attempt = self.inner.retry.execute_if(
            "refresh-credential",
            move || {
                let provider = provider.clone();
                async move { provider.refresh_credential().await }
            },
            move |err: &ProviderError| recovery.should_retry(&CoordinatorError::from(err.clone())),
        );
        let outcome = with_timeout("refresh-credential", budget, attempt).await;

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!("session changed during refresh, discarding result");
            return Err(SessionError::Superseded);
        }

        match outcome {
            Ok(Ok(credential)) => {
                self.inner.consecutive_timeouts.store(0, Ordering::SeqCst);
                self.commit_refresh(credential, generation).await
            }
            Ok(Err(err)) => {
                self.inner.consecutive_timeouts.store(0, Ordering::SeqCst);
                let verdict = self
                    .inner
                    .recovery
                    .recover(&CoordinatorError::from(err.clone()));
                match verdict {
                    Some(verdict) if verdict.sign_in_required => {
                        self.end_revoked_session(SessionError::Provider(err), verdict.message)
                            .await
                    }
                    _ => self.fail_refresh(SessionError::Provider(err)),
                }
            }
            Err(ReliabilityError::Timeout { timeout_ms, .. }) => {
                let timeouts = self.inner.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
                let err = SessionError::Timeout { timeout_ms };
                if timeouts < self.inner.config.timeout_escalation_threshold {
                    return self.fail_refresh(err);
                }
                warn!(timeouts, "repeated refresh timeouts, terminating session");
                self.emit_refresh_failed(&err);
                let issues = vec![format!("{timeouts} consecutive refresh timeouts")];
                self.mark_corrupted(issues.clone()).await;
                Err(SessionError::Corrupted { issues })
            }
        }
    }

    async fn commit_refresh(
        &self,
        credential: Credential,
        generation: u64,
    ) -> Result<Credential, SessionError> {
        let result = validate_credential(&credential, self.inner.clock.now_ms(), &self.inner.config);
        if result.is_corrupted() {
            self.mark_corrupted(result.issues.clone()).await;
            return Err(SessionError::Corrupted {
                issues: result.issues,
            });
        }
        if !result.is_valid() {
            self.inner.events.emit(&AuthEvent::InvalidSession {
                corruption: false,
                issues: result.issues.clone(),
            });
            return self.fail_refresh(SessionError::Invalid {
                issues: result.issues,
            });
        }

        {
            let mut slot = self.inner.credential.write();
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return Err(SessionError::Superseded);
            }
            *slot = Some(credential.clone());
        }
        *self.inner.phase.write() = SessionPhase::Valid;

        self.inner.events.emit(&AuthEvent::SessionRefreshed {
            expires_at_ms: credential.expires_at_ms,
        });
        if !self
            .publish_session(
                &credential.subject.id,
                &credential.subject.email,
                credential.expires_at_ms,
                generation,
            )
            .await
        {
            debug!("session changed while publishing refreshed credential");
            return Err(SessionError::Superseded);
        }
        info!(expires_at_ms = credential.expires_at_ms, "credential refreshed");
        Ok(credential)
    }

    async fn end_revoked_session(
        &self,
        err: SessionError,
        reason: String,
    ) -> Result<Credential, SessionError> {
        self.emit_refresh_failed(&err);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.credential.write().take();
        *self.inner.phase.write() = SessionPhase::NoSession;

        warn!(%reason, "provider no longer knows the session, signing out");
        self.inner.events.emit(&AuthEvent::InvalidSession {
            corruption: false,
            issues: vec![reason],
        });
        self.inner.sync.clear().await;
        Err(err)
    }

    fn fail_refresh(&self, err: SessionError) -> Result<Credential, SessionError> {
        self.emit_refresh_failed(&err);
        let now = self.inner.clock.now_ms();
        let keep = self
            .inner
            .credential
            .read()
            .as_ref()
            .is_some_and(|credential| credential.is_live(now));
        *self.inner.phase.write() = if keep {
            SessionPhase::Valid
        } else {
            SessionPhase::Expired
        };
        warn!(error = %err, class = ?err.class(), keep_credential = keep, "credential refresh failed");
        Err(err)
    }

    // -------------------------------------------------------------------------
    // Validation and periodic checks
    // -------------------------------------------------------------------------

    /// Validate the held credential, terminating the session if it is corrupted
    pub async fn validate_with_details(&self) -> ValidationResult {
        let credential = self.inner.credential.read().clone();
        let Some(credential) = credential else {
            return ValidationResult::no_session();
        };

        let result = validate_credential(&credential, self.inner.clock.now_ms(), &self.inner.config);
        if result.is_corrupted() {
            self.mark_corrupted(result.issues.clone()).await;
        } else if !result.is_valid() {
            self.inner.events.emit(&AuthEvent::InvalidSession {
                corruption: false,
                issues: result.issues.clone(),
            });
        }
        result
    }

    /// One round of the periodic session check
    pub async fn check_session(&self) {
        if self.inner.credential.read().is_none() {
            return;
        }

        let state = self.get_state();
        if !state.is_valid {
            {
                let mut phase = self.inner.phase.write();
                if *phase == SessionPhase::Valid {
                    *phase = SessionPhase::Expired;
                }
            }
            debug!("session check: credential expired");
            self.inner.events.emit(&AuthEvent::SessionExpired);
        } else if let Some(left) = state
            .time_until_expiry
            .filter(|left| *left <= self.inner.config.warning_window())
        {
            self.inner.events.emit(&AuthEvent::SessionWarning {
                time_until_expiry: left,
            });
        }

        if state.needs_refresh && !self.is_refreshing() {
            if let Err(err) = self.refresh().await {
                debug!(error = %err, "scheduled refresh failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn mark_corrupted(&self, issues: Vec<String>) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.credential.write() = None;
        *self.inner.phase.write() = SessionPhase::Corrupted;
        self.inner.consecutive_timeouts.store(0, Ordering::SeqCst);

        error!(?issues, "credential corrupted, terminating session");
        self.inner.events.emit(&AuthEvent::InvalidSession {
            corruption: true,
            issues,
        });
        self.inner.sync.clear().await;
    }

    /// Publish the snapshot derived from the held credential
    ///
    /// Returns `false` if the session changed identity since `generation`, in
    /// which case nothing is published.
    async fn publish_session(
        &self,
        subject_id: &str,
        subject_email: &str,
        expires_at_ms: i64,
        generation: u64,
    ) -> bool {
        let mut superseded = false;
        self.inner
            .sync
            .update(|current, now| {
                // Checked under the acceptance lock, so no shared snapshot can
                // land between this and the publish.
                if self.inner.generation.load(Ordering::SeqCst) != generation {
                    superseded = true;
                    return None;
                }
                let same_subject = current.is_authenticated
                    && current.subject_id.as_deref() == Some(subject_id);
                if !same_subject {
                    return Some(current.authenticated_successor(
                        subject_id,
                        subject_email,
                        expires_at_ms,
                        now,
                    ));
                }
                if current.credential_expiry_epoch_ms == Some(expires_at_ms)
                    && current.subject_email.as_deref() == Some(subject_email)
                {
                    return None;
                }
                // Same subject: keep profile_loaded.
                let mut next = current.successor(now);
                next.subject_email = Some(subject_email.to_string());
                next.credential_expiry_epoch_ms = Some(expires_at_ms);
                Some(next)
            })
            .await;
        !superseded
    }

    /// Drop the credential once the shared snapshot no longer names its subject
    fn on_shared_snapshot(&self, snapshot: &AuthSnapshot) {
        let dropped = {
            let mut slot = self.inner.credential.write();
            let Some(held) = slot.as_ref() else {
                return;
            };
            if snapshot.is_authenticated
                && snapshot.subject_id.as_deref() == Some(held.subject.id.as_str())
            {
                return;
            }
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            slot.take().map(|credential| credential.subject.id)
        };
        *self.inner.phase.write() = SessionPhase::NoSession;
        self.inner.consecutive_timeouts.store(0, Ordering::SeqCst);
        info!(
            dropped_subject = ?dropped,
            now_signed_in = ?snapshot.subject_id,
            "session ended by another context"
        );
    }

    fn emit_refresh_failed(&self, err: &SessionError) {
        self.inner.events.emit(&AuthEvent::RefreshFailed {
            error: err.to_string(),
            class: err.class(),
        });
    }

    async fn on_provider_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::SignedOut => {
                info!("provider ended the session");
                self.sign_out().await;
            }
            ProviderEvent::CredentialChanged(credential) => {
                if let Err(err) = self.establish(credential).await {
                    warn!(error = %err, "provider pushed an unusable credential");
                }
            }
        }
    }

    fn start_background_tasks(&self) {
        let registry = TaskRegistry::new();

        let weak = Arc::downgrade(&self.inner);
        registry.spawn_interval_until(self.inner.config.check_interval(), move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                SessionLifecycleManager { inner }.check_session().await;
                true
            }
        });

        if let Some(mut events) = self.inner.provider.events() {
            let weak = Arc::downgrade(&self.inner);
            registry.spawn_cancellable(async move {
                loop {
                    let event = match events.recv().await {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "provider events lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    SessionLifecycleManager { inner }
                        .on_provider_event(event)
                        .await;
                }
            });
        }

        if let Some(previous) = self.inner.tasks.lock().replace(registry) {
            previous.shutdown();
        }
        debug!(
            check_interval_ms = self.inner.config.check_interval_ms,
            "session background tasks started"
        );
    }
}

impl std::fmt::Debug for SessionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycleManager")
            .field("phase", &self.phase())
            .field("generation", &self.inner.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
