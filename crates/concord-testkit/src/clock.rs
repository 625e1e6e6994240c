//! Manually advanced clock

use concord_core::PhysicalClock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn now(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Duration) {
        self.advance_ms(delta.as_millis() as i64);
    }
}

impl PhysicalClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now()
    }
}
