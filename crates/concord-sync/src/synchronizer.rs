//! State synchronizer service
//!
//! # Propagation rules
//!
//! - Only a local `publish` (or `clear`) writes the durable store and
//!   broadcasts. Snapshots accepted from the channel or the store are applied
//!   in memory only, so a broadcast never echoes back and a slow reader never
//!   overwrites the store with something older.
//! - Acceptance is serialized per context: candidates are applied in call
//!   order whatever their source.
//! - An absent store entry means "signed out" only after this context has seen
//!   the store agree with it at least once. Before that, absence just means
//!   nothing has been written yet.
//!
//! No operation here returns an error. Rejections, store failures and
//! broadcast failures are logged, counted in [`SyncStats`] and surfaced as
//! [`AuthEvent::SyncError`].

use crate::conflict::resolve_conflict;
use crate::recovery::StoreQuotaRecovery;
use crate::stats::{SyncStats, SyncStatsSnapshot};
use concord_core::{
    AuthEvent, AuthSnapshot, ChannelEnvelope, ChannelPayload, ContextChannel, ContextId,
    CoordinatorError, DurableStore, EventBus, PhysicalClock, RecoveryRegistry, RetryPolicy,
    StoreError, SyncConfig,
};
use concord_effects::TaskRegistry;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// =============================================================================
// Observers
// =============================================================================

/// Notified synchronously after every change to the current snapshot
pub trait SnapshotObserver: Send + Sync {
    /// The current snapshot changed to `snapshot`
    fn on_snapshot(&self, snapshot: &AuthSnapshot);
}

impl<F> SnapshotObserver for F
where
    F: Fn(&AuthSnapshot) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: &AuthSnapshot) {
        self(snapshot);
    }
}

/// What happened to a candidate snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Became the current snapshot
    Accepted,
    /// Dropped by validation or conflict resolution
    Rejected,
    /// Identical to the current snapshot
    Unchanged,
    /// Our own broadcast coming back
    Ignored,
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Local,
    Remote(ContextId),
    Store,
}

// =============================================================================
// Synchronizer
// =============================================================================

struct SyncInner {
    context_id: ContextId,
    config: SyncConfig,
    store: Arc<dyn DurableStore>,
    channel: Arc<dyn ContextChannel>,
    clock: Arc<dyn PhysicalClock>,
    events: EventBus<AuthEvent>,
    store_retry: RetryPolicy,
    recovery: RecoveryRegistry,
    snapshot: RwLock<AuthSnapshot>,
    apply_lock: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn SnapshotObserver>>>,
    store_confirmed: AtomicBool,
    stats: SyncStats,
}

/// Keeps this context's snapshot consistent with every other context
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StateSynchronizer {
    inner: Arc<SyncInner>,
}

impl StateSynchronizer {
    /// Create a synchronizer starting from the signed-out snapshot
    ///
    /// Store writes are retried per `store_retry` for as long as `recovery`
    /// says the failure is worth retrying; quota failures never are.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context_id: ContextId,
        config: SyncConfig,
        store: Arc<dyn DurableStore>,
        channel: Arc<dyn ContextChannel>,
        clock: Arc<dyn PhysicalClock>,
        events: EventBus<AuthEvent>,
        store_retry: RetryPolicy,
        mut recovery: RecoveryRegistry,
    ) -> Self {
        recovery.register_first(StoreQuotaRecovery);
        Self {
            inner: Arc::new(SyncInner {
                context_id,
                config,
                store,
                channel,
                clock,
                events,
                store_retry,
                recovery,
                snapshot: RwLock::new(AuthSnapshot::signed_out(0, 0)),
                apply_lock: Mutex::new(()),
                observers: RwLock::new(Vec::new()),
                store_confirmed: AtomicBool::new(false),
                stats: SyncStats::default(),
            }),
        }
    }

    /// Identifier of this context
    pub fn context_id(&self) -> ContextId {
        self.inner.context_id
    }

    /// Current snapshot
    pub fn current(&self) -> AuthSnapshot {
        self.inner.snapshot.read().clone()
    }

    /// Counter snapshot
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Register an observer for snapshot changes
    pub fn add_observer(&self, observer: Arc<dyn SnapshotObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Start the channel listener and the safety-net store poll
    ///
    /// Reads the store once before returning so a freshly started context
    /// picks up the origin's state immediately.
    pub async fn start(&self, tasks: &TaskRegistry) {
        // Subscribe before the initial read so nothing sent in between is lost.
        let receiver = match self.inner.channel.subscribe() {
            Ok(receiver) => Some(receiver),
            Err(err) => {
                warn!(
                    context_id = %self.inner.context_id,
                    error = %err,
                    "channel unavailable, relying on store polling"
                );
                None
            }
        };

        self.refresh_from_store().await;

        if let Some(mut receiver) = receiver {
            let this = self.clone();
            tasks.spawn_cancellable(async move {
                while let Some(envelope) = receiver.recv().await {
                    let ChannelEnvelope {
                        origin,
                        sent_at_ms,
                        payload,
                    } = envelope;
                    this.on_remote_message(payload.into_snapshot(), origin, sent_at_ms)
                        .await;
                }
                debug!(context_id = %this.inner.context_id, "channel closed, listener stopped");
            });
        }

        let this = self.clone();
        tasks.spawn_interval_until(self.inner.config.poll_interval(), move || {
            let this = this.clone();
            async move {
                this.refresh_from_store().await;
                true
            }
        });

        info!(
            context_id = %self.inner.context_id,
            poll_interval_ms = self.inner.config.poll_interval_ms,
            "state synchronizer started"
        );
    }

    /// Offer a locally produced snapshot
    ///
    /// On acceptance the snapshot is persisted and broadcast.
    pub async fn publish(&self, snapshot: AuthSnapshot) -> PublishOutcome {
        let _guard = self.inner.apply_lock.lock().await;
        self.apply(snapshot, Source::Local).await
    }

    /// Build a local snapshot from the current one and publish it atomically
    ///
    /// `next` sees the current snapshot under the acceptance lock, so no other
    /// candidate can land between reading and publishing. Returning `None`
    /// publishes nothing.
    pub async fn update<F>(&self, next: F) -> PublishOutcome
    where
        F: FnOnce(&AuthSnapshot, i64) -> Option<AuthSnapshot>,
    {
        let _guard = self.inner.apply_lock.lock().await;
        let current = self.current();
        match next(&current, self.inner.clock.now_ms()) {
            Some(snapshot) => self.apply(snapshot, Source::Local).await,
            None => PublishOutcome::Unchanged,
        }
    }

    /// Handle a snapshot broadcast by another context
    pub async fn on_remote_message(
        &self,
        snapshot: AuthSnapshot,
        origin: ContextId,
        sent_at_ms: i64,
    ) -> PublishOutcome {
        if origin == self.inner.context_id {
            return PublishOutcome::Ignored;
        }
        debug!(
            context_id = %self.inner.context_id,
            %origin,
            version = snapshot.version,
            transit_ms = self.inner.clock.now_ms().saturating_sub(sent_at_ms),
            "remote snapshot received"
        );
        let _guard = self.inner.apply_lock.lock().await;
        self.apply(snapshot, Source::Remote(origin)).await
    }

    /// Re-read the durable store and offer its contents
    ///
    /// Returns what the store holds, whether or not it was accepted. Malformed
    /// entries are deleted and reported as `None`.
    pub async fn refresh_from_store(&self) -> Option<AuthSnapshot> {
        let _guard = self.inner.apply_lock.lock().await;
        let key = self.inner.config.storage_key.as_str();

        let raw = match self.inner.store.get(key) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(context_id = %self.inner.context_id, error = %err, "store read failed");
                return None;
            }
        };

        let Some(raw) = raw else {
            self.adopt_store_absence();
            return None;
        };

        match serde_json::from_str::<AuthSnapshot>(&raw) {
            Ok(snapshot) => {
                self.apply(snapshot.clone(), Source::Store).await;
                Some(snapshot)
            }
            Err(err) => {
                SyncStats::incr(&self.inner.stats.malformed_entries_total);
                warn!(
                    context_id = %self.inner.context_id,
                    error = %err,
                    "malformed snapshot in store, deleting"
                );
                if let Err(err) = self.inner.store.remove(key) {
                    warn!(error = %err, "failed to delete malformed snapshot");
                }
                self.raise_sync_error(format!("malformed stored snapshot: {err}"));
                None
            }
        }
    }

    /// Sign this origin out
    ///
    /// Removes the store entry, adopts a signed-out successor and broadcasts
    /// a clear message. Clearing an already signed-out context only removes
    /// the store entry.
    pub async fn clear(&self) {
        let _guard = self.inner.apply_lock.lock().await;
        let key = self.inner.config.storage_key.clone();

        let store = self.inner.store.clone();
        let removed = self
            .inner
            .store_retry
            .execute_if(
                "clear-snapshot",
                || {
                    let result = store.remove(&key);
                    async move { result }
                },
                |err: &StoreError| self.should_retry_store(err),
            )
            .await;
        self.record_store_result(removed);

        let current = self.current();
        if !current.is_authenticated {
            return;
        }

        let next = current.signed_out_successor(self.inner.clock.now_ms());
        *self.inner.snapshot.write() = next.clone();
        SyncStats::incr(&self.inner.stats.accepted_total);
        info!(
            context_id = %self.inner.context_id,
            version = next.version,
            "cleared auth state"
        );

        self.broadcast(ChannelPayload::Clear(next.clone()));
        self.notify(&next);
    }

    // -------------------------------------------------------------------------
    // Acceptance path
    // -------------------------------------------------------------------------

    async fn apply(&self, incoming: AuthSnapshot, source: Source) -> PublishOutcome {
        if let Err(err) = incoming.validate() {
            SyncStats::incr(&self.inner.stats.rejected_total);
            self.raise_sync_error(format!("invalid snapshot: {err}"));
            return PublishOutcome::Rejected;
        }

        let current = self.current();
        if current == incoming {
            SyncStats::incr(&self.inner.stats.unchanged_total);
            if !matches!(source, Source::Local) {
                self.inner.store_confirmed.store(true, Ordering::SeqCst);
            }
            return PublishOutcome::Unchanged;
        }

        let decision = resolve_conflict(&current, &incoming, self.inner.config.max_version_gap);
        if let (Some(kind), Some(resolution)) = (decision.conflict, decision.resolution()) {
            SyncStats::incr(&self.inner.stats.conflicts_total);
            debug!(
                context_id = %self.inner.context_id,
                ?kind,
                ?resolution,
                current_version = current.version,
                incoming_version = incoming.version,
                "snapshot conflict"
            );
            self.inner.events.emit(&AuthEvent::ConflictDetected {
                current: current.clone(),
                incoming: incoming.clone(),
                origin: self.origin_of(source),
                kind,
                resolution,
            });
        }

        if !decision.accepted {
            SyncStats::incr(&self.inner.stats.rejected_total);
            self.raise_sync_error(format!(
                "stale snapshot v{} rejected in favour of v{}",
                incoming.version, current.version
            ));
            return PublishOutcome::Rejected;
        }

        *self.inner.snapshot.write() = incoming.clone();
        SyncStats::incr(&self.inner.stats.accepted_total);
        debug!(
            context_id = %self.inner.context_id,
            version = incoming.version,
            authenticated = incoming.is_authenticated,
            ?source,
            "snapshot accepted"
        );

        match source {
            Source::Local => {
                self.persist(&incoming).await;
                self.broadcast(ChannelPayload::Snapshot(incoming.clone()));
            }
            Source::Remote(_) | Source::Store => {
                self.inner.store_confirmed.store(true, Ordering::SeqCst);
            }
        }

        self.notify(&incoming);
        PublishOutcome::Accepted
    }

    fn adopt_store_absence(&self) {
        let current = self.current();
        if !current.is_authenticated || !self.inner.store_confirmed.load(Ordering::SeqCst) {
            return;
        }
        // The entry we previously agreed with is gone: another context signed out.
        // Its clear broadcast may never arrive, so the successor is stamped with
        // our clock. Both contexts then hold the same version, both signed out,
        // differing only in `updated_at_epoch_ms`.
        let next = current.signed_out_successor(self.inner.clock.now_ms());
        *self.inner.snapshot.write() = next.clone();
        SyncStats::incr(&self.inner.stats.accepted_total);
        info!(
            context_id = %self.inner.context_id,
            version = next.version,
            "store entry removed elsewhere, signing out"
        );
        self.notify(&next);
    }

    async fn persist(&self, snapshot: &AuthSnapshot) {
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(err) => {
                self.record_store_result(Err(StoreError::Io(err.to_string())));
                return;
            }
        };
        let key = self.inner.config.storage_key.as_str();
        let store = self.inner.store.clone();
        let written = self
            .inner
            .store_retry
            .execute_if(
                "persist-snapshot",
                || {
                    let result = store.set(key, &raw);
                    async move { result }
                },
                |err: &StoreError| self.should_retry_store(err),
            )
            .await;
        self.record_store_result(written);
    }

    fn should_retry_store(&self, err: &StoreError) -> bool {
        self.inner
            .recovery
            .should_retry(&CoordinatorError::from(err.clone()))
    }

    fn record_store_result(&self, result: Result<(), StoreError>) {
        match result {
            Ok(()) => self.inner.store_confirmed.store(true, Ordering::SeqCst),
            Err(err) => {
                self.inner.store_confirmed.store(false, Ordering::SeqCst);
                SyncStats::incr(&self.inner.stats.store_failures_total);
                warn!(
                    context_id = %self.inner.context_id,
                    error = %err,
                    "durable store write failed; other contexts rely on the channel"
                );
                self.raise_sync_error(format!("store write failed: {err}"));
            }
        }
    }

    fn broadcast(&self, payload: ChannelPayload) {
        let envelope = ChannelEnvelope {
            origin: self.inner.context_id,
            sent_at_ms: self.inner.clock.now_ms(),
            payload,
        };
        if let Err(err) = self.inner.channel.send(&envelope) {
            SyncStats::incr(&self.inner.stats.broadcast_failures_total);
            warn!(
                context_id = %self.inner.context_id,
                error = %err,
                "broadcast failed; store polling will propagate"
            );
        }
    }

    fn notify(&self, snapshot: &AuthSnapshot) {
        let observers = self.inner.observers.read().clone();
        for observer in observers {
            observer.on_snapshot(snapshot);
        }
    }

    fn raise_sync_error(&self, reason: String) {
        debug!(context_id = %self.inner.context_id, %reason, "sync error");
        self.inner.events.emit(&AuthEvent::SyncError {
            context_id: self.inner.context_id,
            reason,
        });
    }

    fn origin_of(&self, source: Source) -> Option<ContextId> {
        match source {
            Source::Local => Some(self.inner.context_id),
            Source::Remote(origin) => Some(origin),
            Source::Store => None,
        }
    }
}

impl std::fmt::Debug for StateSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSynchronizer")
            .field("context_id", &self.inner.context_id)
            .field("snapshot", &*self.inner.snapshot.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use concord_effects::{MemoryChannelHub, MemoryStore};
    use concord_testkit::ManualClock;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        sync: StateSynchronizer,
        store: MemoryStore,
        events: EventBus<AuthEvent>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let hub = MemoryChannelHub::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let events = EventBus::new();
        let sync = StateSynchronizer::new(
            ContextId::new(),
            SyncConfig::default(),
            Arc::new(store.clone()),
            Arc::new(hub.endpoint()),
            clock.clone(),
            events.clone(),
            RetryPolicy::none(),
            RecoveryRegistry::with_builtin_patterns(),
        );
        Fixture {
            sync,
            store,
            events,
            clock,
        }
    }

    fn signed_in(version: u64, ts: i64) -> AuthSnapshot {
        AuthSnapshot::authenticated("u1", "u1@example.com", 9_999_999, version, ts)
    }

    #[tokio::test]
    async fn publish_persists_and_notifies() {
        let f = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        f.sync.add_observer(Arc::new(move |_: &AuthSnapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(f.sync.publish(signed_in(1, 10)).await, PublishOutcome::Accepted);
        assert_eq!(f.sync.publish(signed_in(1, 10)).await, PublishOutcome::Unchanged);

        let raw = f.store.get("concord.auth.snapshot").unwrap().unwrap();
        let stored: AuthSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, signed_in(1, 10));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_snapshot_raises_sync_error() {
        let f = fixture();
        let errors = Arc::new(RwLock::new(Vec::new()));
        let sink = errors.clone();
        f.events.subscribe(move |event| {
            if let AuthEvent::SyncError { reason, .. } = event {
                sink.write().push(reason.clone());
            }
        });

        let mut bad = signed_in(1, 10);
        bad.subject_email = None;
        assert_eq!(f.sync.publish(bad).await, PublishOutcome::Rejected);
        assert!(!f.sync.current().is_authenticated);
        assert_eq!(errors.read().len(), 1);
        assert_eq!(f.sync.stats().rejected_total, 1);
    }

    #[tokio::test]
    async fn stale_remote_snapshot_is_rejected() {
        let f = fixture();
        f.sync.publish(signed_in(5, 100)).await;

        let outcome = f
            .sync
            .on_remote_message(signed_in(3, 200), ContextId::new(), 200)
            .await;
        assert_eq!(outcome, PublishOutcome::Rejected);
        assert_eq!(f.sync.current().version, 5);
    }

    #[tokio::test]
    async fn self_echo_is_ignored() {
        let f = fixture();
        let own = f.sync.context_id();
        assert_eq!(
            f.sync.on_remote_message(signed_in(9, 100), own, 100).await,
            PublishOutcome::Ignored
        );
        assert_eq!(f.sync.current().version, 0);
    }

    #[tokio::test]
    async fn conflict_is_evented_with_origin() {
        let f = fixture();
        f.sync.publish(signed_in(5, 100)).await;

        let conflicts = Arc::new(RwLock::new(Vec::new()));
        let sink = conflicts.clone();
        f.events.subscribe(move |event| {
            if let AuthEvent::ConflictDetected { origin, resolution, .. } = event {
                sink.write().push((*origin, *resolution));
            }
        });

        let other = ContextId::new();
        let incoming = AuthSnapshot::authenticated("u2", "u2@example.com", 9_999_999, 2, 300);
        assert_eq!(
            f.sync.on_remote_message(incoming, other, 300).await,
            PublishOutcome::Accepted
        );
        assert_eq!(
            conflicts.read().as_slice(),
            &[(Some(other), concord_core::ConflictResolution::AcceptedIncoming)]
        );
    }

    #[tokio::test]
    async fn malformed_store_entry_is_deleted() {
        let f = fixture();
        f.store.set("concord.auth.snapshot", "{not json").unwrap();

        assert_eq!(f.sync.refresh_from_store().await, None);
        assert_eq!(f.store.get("concord.auth.snapshot").unwrap(), None);
        assert_eq!(f.sync.stats().malformed_entries_total, 1);
    }

    #[tokio::test]
    async fn store_absence_signs_out_confirmed_context() {
        let f = fixture();
        // A remote snapshot arrives but nothing ever reached the store.
        f.sync
            .on_remote_message(signed_in(1, 10), ContextId::new(), 10)
            .await;
        f.store.remove("concord.auth.snapshot").unwrap();

        // Remote acceptance counts as confirmation, so absence now signs out.
        assert_eq!(f.sync.refresh_from_store().await, None);
        assert!(!f.sync.current().is_authenticated);
        assert_eq!(f.sync.current().version, 2);

        let fresh = fixture();
        assert_eq!(fresh.sync.refresh_from_store().await, None);
        assert_eq!(fresh.sync.current(), AuthSnapshot::signed_out(0, 0));
    }

    #[tokio::test]
    async fn clear_removes_entry_and_bumps_version() {
        let f = fixture();
        f.sync.publish(signed_in(4, 100)).await;
        f.clock.advance_ms(50);

        f.sync.clear().await;

        let current = f.sync.current();
        assert!(!current.is_authenticated);
        assert_eq!(current.version, 5);
        assert_eq!(current.updated_at_epoch_ms, 1_050);
        assert_matches!(f.store.get("concord.auth.snapshot"), Ok(None));
    }

    #[tokio::test]
    async fn update_builds_from_current() {
        let f = fixture();
        f.sync.publish(signed_in(4, 100)).await;

        let outcome = f
            .sync
            .update(|current, now| {
                let mut next = current.successor(now);
                next.profile_loaded = true;
                Some(next)
            })
            .await;

        assert_eq!(outcome, PublishOutcome::Accepted);
        let current = f.sync.current();
        assert!(current.profile_loaded);
        assert_eq!(current.version, 5);
        assert_eq!(f.sync.update(|_, _| None).await, PublishOutcome::Unchanged);
    }
}
