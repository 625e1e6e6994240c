//! Delivery metrics

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// How a state reached subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Critical update, delivered inside `publish`
    Immediate,
    /// Coalesced update, delivered by the batch flush
    Batched,
    /// Explicit `force_update`
    Forced,
}

/// Running dispatch statistics
///
/// Latency is a rolling average over the last `window` dispatches; the
/// maximum covers the dispatcher's whole lifetime.
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    dispatch_count: u64,
    immediate_count: u64,
    batched_count: u64,
    forced_count: u64,
    superseded_count: u64,
    failed_callbacks: u64,
    invalid_transitions: u64,
    dropped_transitions: u64,
    max_latency: Duration,
    recent: VecDeque<Duration>,
    window: usize,
}

impl DispatchMetrics {
    /// Empty metrics averaging over the last `window` dispatches
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            dispatch_count: 0,
            immediate_count: 0,
            batched_count: 0,
            forced_count: 0,
            superseded_count: 0,
            failed_callbacks: 0,
            invalid_transitions: 0,
            dropped_transitions: 0,
            max_latency: Duration::ZERO,
            recent: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Record one dispatch to every subscriber
    pub fn record_dispatch(&mut self, mode: DeliveryMode, latency: Duration, failed: u64) {
        self.dispatch_count += 1;
        match mode {
            DeliveryMode::Immediate => self.immediate_count += 1,
            DeliveryMode::Batched => self.batched_count += 1,
            DeliveryMode::Forced => self.forced_count += 1,
        }
        self.failed_callbacks += failed;
        self.max_latency = self.max_latency.max(latency);

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
    }

    /// A parked update was replaced before it was delivered
    pub fn record_superseded(&mut self) {
        self.superseded_count += 1;
    }

    /// A subscriber panicked outside a dispatch (initial delivery)
    pub fn record_failed_callback(&mut self) {
        self.failed_callbacks += 1;
    }

    /// An invalid transition was seen; `dropped` under fail-closed
    pub fn record_invalid_transition(&mut self, dropped: bool) {
        self.invalid_transitions += 1;
        if dropped {
            self.dropped_transitions += 1;
        }
    }

    /// Rolling average latency
    pub fn average_latency(&self) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.recent.iter().sum();
        total / self.recent.len() as u32
    }

    /// Serializable copy
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            dispatch_count: self.dispatch_count,
            immediate_count: self.immediate_count,
            batched_count: self.batched_count,
            forced_count: self.forced_count,
            superseded_count: self.superseded_count,
            failed_callbacks: self.failed_callbacks,
            invalid_transitions: self.invalid_transitions,
            dropped_transitions: self.dropped_transitions,
            average_latency: self.average_latency(),
            max_latency: self.max_latency,
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Point-in-time dispatch metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetricsSnapshot {
    /// Dispatches of any mode
    pub dispatch_count: u64,
    /// Critical dispatches
    pub immediate_count: u64,
    /// Batch flushes that delivered a state
    pub batched_count: u64,
    /// `force_update` dispatches
    pub forced_count: u64,
    /// Parked updates replaced or discarded before delivery
    pub superseded_count: u64,
    /// Subscriber callbacks that panicked
    pub failed_callbacks: u64,
    /// Transitions flagged by validation
    pub invalid_transitions: u64,
    /// Flagged transitions that were not delivered
    pub dropped_transitions: u64,
    /// Rolling average latency
    pub average_latency: Duration,
    /// Worst latency seen
    pub max_latency: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_forgets_old_samples() {
        let mut metrics = DispatchMetrics::new(2);
        metrics.record_dispatch(DeliveryMode::Immediate, Duration::from_millis(90), 0);
        metrics.record_dispatch(DeliveryMode::Batched, Duration::from_millis(10), 0);
        metrics.record_dispatch(DeliveryMode::Batched, Duration::from_millis(30), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dispatch_count, 3);
        assert_eq!(snapshot.immediate_count, 1);
        assert_eq!(snapshot.batched_count, 2);
        assert_eq!(snapshot.failed_callbacks, 1);
        assert_eq!(snapshot.average_latency, Duration::from_millis(20));
        assert_eq!(snapshot.max_latency, Duration::from_millis(90));
    }

    #[test]
    fn empty_metrics_average_zero() {
        assert_eq!(DispatchMetrics::new(0).average_latency(), Duration::ZERO);
    }

    #[test]
    fn dropped_transitions_are_also_invalid() {
        let mut metrics = DispatchMetrics::default();
        metrics.record_invalid_transition(false);
        metrics.record_invalid_transition(true);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.invalid_transitions, 2);
        assert_eq!(snapshot.dropped_transitions, 1);
    }
}
