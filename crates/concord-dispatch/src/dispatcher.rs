//! Update Dispatcher
//!
//! # Batching
//!
//! Non-critical updates land in a single pending slot. The first one to land
//! schedules one flush on the current tokio runtime, `batch_window` later;
//! later updates only overwrite the slot. Outside a runtime there is nothing
//! to schedule on, so the slot is flushed straight away.
//!
//! # Reentrancy
//!
//! No lock is held while subscriber callbacks run, so a callback may publish,
//! subscribe or unsubscribe.

use crate::metrics::{DeliveryMode, DispatchMetrics, DispatchMetricsSnapshot};
use crate::state::{is_critical_change, AuthState};
use crate::transitions::validate_transition;
use concord_core::{DispatchConfig, TransitionPolicy};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace, warn};

type Callback = Arc<dyn Fn(&AuthState) + Send + Sync>;

/// Options for [`UpdateDispatcher::subscribe`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Higher priorities are called first
    pub priority: i32,
    /// Name used in logs
    pub label: Option<String>,
}

impl SubscribeOptions {
    /// Priority 0, no label
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

struct Subscriber {
    id: u64,
    priority: i32,
    label: String,
    callback: Callback,
}

/// What `publish` did with a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Critical: already delivered
    Immediate,
    /// Parked for the next flush
    Batched,
    /// Identical to the current state
    Unchanged,
    /// Invalid under the fail-closed policy
    Dropped,
}

struct DispatchInner {
    config: DispatchConfig,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    current: RwLock<AuthState>,
    pending: Mutex<Option<AuthState>>,
    flush_scheduled: AtomicBool,
    next_id: AtomicU64,
    metrics: Mutex<DispatchMetrics>,
}

/// Priority-ordered fan-out of [`AuthState`]
#[derive(Clone)]
pub struct UpdateDispatcher {
    inner: Arc<DispatchInner>,
}

impl UpdateDispatcher {
    /// Dispatcher starting from [`AuthState::initial`]
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_state(config, AuthState::initial())
    }

    /// Dispatcher starting from `state`
    pub fn with_state(config: DispatchConfig, state: AuthState) -> Self {
        let metrics = DispatchMetrics::new(config.latency_window);
        Self {
            inner: Arc::new(DispatchInner {
                config,
                subscribers: RwLock::new(Vec::new()),
                current: RwLock::new(state),
                pending: Mutex::new(None),
                flush_scheduled: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                metrics: Mutex::new(metrics),
            }),
        }
    }

    /// Latest published state, whether or not it has been delivered yet
    pub fn current_state(&self) -> AuthState {
        self.inner.current.read().clone()
    }

    /// Whether a non-critical update is waiting for its flush
    pub fn has_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    pub fn metrics(&self) -> DispatchMetricsSnapshot {
        self.inner.metrics.lock().snapshot()
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register `callback` and call it once, right away, with the current state
    ///
    /// The subscription lasts until [`SubscriptionHandle::unsubscribe`].
    pub fn subscribe<F>(&self, callback: F, options: SubscribeOptions) -> SubscriptionHandle
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            priority: options.priority,
            label: options.label.unwrap_or_else(|| format!("subscriber-{id}")),
            callback: Arc::new(callback),
        });

        {
            let mut subscribers = self.inner.subscribers.write();
            // Equal priorities keep registration order.
            let index = subscribers.partition_point(|s| s.priority >= subscriber.priority);
            subscribers.insert(index, subscriber.clone());
        }
        debug!(
            subscriber = %subscriber.label,
            priority = subscriber.priority,
            "auth state subscriber added"
        );

        let state = self.current_state();
        if !invoke(&subscriber, &state) {
            self.inner.metrics.lock().record_failed_callback();
        }

        SubscriptionHandle {
            id,
            label: subscriber.label.clone(),
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    /// Publish a new state
    pub fn publish(&self, next: AuthState) -> DispatchOutcome {
        let previous = self.current_state();
        if previous == next {
            return DispatchOutcome::Unchanged;
        }

        let issues = validate_transition(&previous, &next);
        if !issues.is_empty() {
            let drop = self.inner.config.transition_policy == TransitionPolicy::FailClosed;
            self.inner.metrics.lock().record_invalid_transition(drop);
            warn!(
                ?issues,
                policy = ?self.inner.config.transition_policy,
                version = next.snapshot.version,
                "invalid auth state transition"
            );
            if drop {
                return DispatchOutcome::Dropped;
            }
        }

        *self.inner.current.write() = next.clone();

        if is_critical_change(&previous, &next) {
            if self.inner.pending.lock().take().is_some() {
                self.inner.metrics.lock().record_superseded();
            }
            self.deliver(&next, DeliveryMode::Immediate);
            DispatchOutcome::Immediate
        } else {
            if self.inner.pending.lock().replace(next).is_some() {
                self.inner.metrics.lock().record_superseded();
            }
            self.schedule_flush();
            DispatchOutcome::Batched
        }
    }

    /// Deliver the current state to every subscriber now, dropping anything pending
    pub fn force_update(&self) {
        if self.inner.pending.lock().take().is_some() {
            trace!("force_update absorbed a pending update");
        }
        let state = self.current_state();
        self.deliver(&state, DeliveryMode::Forced);
    }

    /// Deliver the pending update, if any; returns whether one was delivered
    pub fn flush(&self) -> bool {
        self.inner.flush_scheduled.store(false, Ordering::SeqCst);
        let Some(state) = self.inner.pending.lock().take() else {
            return false;
        };
        self.deliver(&state, DeliveryMode::Batched);
        true
    }

    fn schedule_flush(&self) {
        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.flush();
            return;
        };
        let dispatcher: Weak<DispatchInner> = Arc::downgrade(&self.inner);
        let window = self.inner.config.batch_window();
        handle.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = dispatcher.upgrade() {
                UpdateDispatcher { inner }.flush();
            }
        });
    }

    fn deliver(&self, state: &AuthState, mode: DeliveryMode) {
        let subscribers = self.inner.subscribers.read().clone();
        let started = Instant::now();

        let mut failed = 0;
        for subscriber in &subscribers {
            if !invoke(subscriber, state) {
                failed += 1;
            }
        }

        let elapsed = started.elapsed();
        self.inner
            .metrics
            .lock()
            .record_dispatch(mode, elapsed, failed);

        if elapsed > self.inner.config.slow_dispatch() {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                subscribers = subscribers.len(),
                ?mode,
                "slow auth state dispatch"
            );
        } else {
            trace!(
                elapsed_us = elapsed.as_micros() as u64,
                subscribers = subscribers.len(),
                ?mode,
                version = state.snapshot.version,
                "auth state dispatched"
            );
        }
    }
}

/// Run one callback; `false` if it panicked
fn invoke(subscriber: &Subscriber, state: &AuthState) -> bool {
    let ok = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(state))).is_ok();
    if !ok {
        warn!(
            subscriber = %subscriber.label,
            priority = subscriber.priority,
            "auth state subscriber panicked"
        );
    }
    ok
}

impl std::fmt::Debug for UpdateDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateDispatcher")
            .field("subscribers", &self.subscriber_count())
            .field("pending", &self.has_pending())
            .finish_non_exhaustive()
    }
}

/// Registration returned by [`UpdateDispatcher::subscribe`]
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    label: String,
    dispatcher: Weak<DispatchInner>,
}

impl SubscriptionHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Remove the subscription; `false` if the dispatcher is gone
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.dispatcher.upgrade() else {
            return false;
        };
        let removed = UpdateDispatcher { inner }.unsubscribe(self.id);
        debug!(subscriber = %self.label, removed, "auth state subscriber removed");
        removed
    }
}
