//! Lifecycle and synchronization events
//!
//! [`EventBus`] is a typed fan-out: handlers run in registration order, and a
//! handler that panics is logged and skipped without affecting the others.

use crate::errors::ErrorClass;
use crate::types::{AuthSnapshot, ContextId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Why two snapshots were considered conflicting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Different signed-in subjects
    SubjectChanged,
    /// One side signed in, the other signed out
    AuthenticationChanged,
    /// Version counters diverged by more than the allowed gap
    VersionGap,
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Incoming snapshot was newer and replaced the current one
    AcceptedIncoming,
    /// Current snapshot was kept
    KeptCurrent,
}

/// Events raised by the synchronizer and the session lifecycle manager
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// A candidate snapshot was rejected
    SyncError {
        /// Context that raised the event
        context_id: ContextId,
        /// Why the candidate was dropped
        reason: String,
    },
    /// Two snapshots diverged
    ConflictDetected {
        /// Snapshot held before the conflict
        current: AuthSnapshot,
        /// Candidate snapshot
        incoming: AuthSnapshot,
        /// Context the candidate came from; `None` when read from the durable store
        origin: Option<ContextId>,
        /// Conflict category
        kind: ConflictKind,
        /// Outcome of last-writer-wins resolution
        resolution: ConflictResolution,
    },
    /// Credential was refreshed
    SessionRefreshed {
        /// New expiry (epoch ms)
        expires_at_ms: i64,
    },
    /// Credential expires within the warning window
    SessionWarning {
        /// Time left before expiry
        time_until_expiry: Duration,
    },
    /// Credential is no longer valid
    SessionExpired,
    /// Refresh failed; the caller may retry or force re-authentication
    RefreshFailed {
        /// Failure detail
        error: String,
        /// Taxonomy class of the failure
        class: ErrorClass,
    },
    /// Credential failed validation
    InvalidSession {
        /// Terminal corruption (must sign out) vs merely invalid
        corruption: bool,
        /// Individual validation failures
        issues: Vec<String>,
    },
    /// Session ended (local sign-out, provider sign-out, or corruption)
    SignedOut,
}

impl AuthEvent {
    /// Stable kebab-case name, e.g. for a diagnostics panel
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncError { .. } => "sync-error",
            Self::ConflictDetected { .. } => "conflict-detected",
            Self::SessionRefreshed { .. } => "session-refreshed",
            Self::SessionWarning { .. } => "session-warning",
            Self::SessionExpired => "session-expired",
            Self::RefreshFailed { .. } => "refresh-failed",
            Self::InvalidSession { .. } => "invalid-session",
            Self::SignedOut => "signed-out",
        }
    }
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct BusInner<E> {
    handlers: RwLock<Vec<(u64, Handler<E>)>>,
    next_id: AtomicU64,
}

/// Typed event bus with per-handler isolation
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler; it stays registered until `unsubscribe` is called
    pub fn subscribe<F>(&self, handler: F) -> EventSubscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.write().push((id, Arc::new(handler)));
        EventSubscription { id }
    }

    /// Remove a handler; returns `false` if it was already removed
    pub fn unsubscribe(&self, subscription: EventSubscription) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        handlers.len() != before
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Deliver `event` to every handler; returns how many handlers panicked
    pub fn emit(&self, event: &E) -> usize {
        // Snapshot so handlers may (un)subscribe while being called.
        let handlers: Vec<Handler<E>> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        let mut failures = 0;
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                failures += 1;
                warn!("event handler panicked; continuing with remaining handlers");
            }
        }
        failures
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSubscription {
    id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn failing_handler_does_not_block_others() {
        let bus: EventBus<AuthEvent> = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("boom"));
        let counter = seen.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let failures = bus.emit(&AuthEvent::SessionExpired);
        assert_eq!(failures, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = bus.subscribe(move |value| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
        });

        bus.emit(&2);
        assert!(bus.unsubscribe(sub));
        assert!(!bus.unsubscribe(sub));
        bus.emit(&5);

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn event_names_are_kebab_case() {
        assert_eq!(AuthEvent::SessionExpired.name(), "session-expired");
        assert_eq!(
            AuthEvent::InvalidSession {
                corruption: true,
                issues: vec![]
            }
            .name(),
            "invalid-session"
        );
    }
}
