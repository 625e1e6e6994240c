//! System clock

use concord_core::PhysicalClock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock backed by [`SystemTime`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a system clock
    pub fn new() -> Self {
        Self
    }
}

impl PhysicalClock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as i64
    }
}
