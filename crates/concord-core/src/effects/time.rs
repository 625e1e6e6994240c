//! Wall-clock time interface

/// Wall-clock time for expiry arithmetic and conflict tie-breaking
///
/// Never used for ordering guarantees; `AuthSnapshot::version` does that.
pub trait PhysicalClock: Send + Sync {
    /// Current time in epoch milliseconds
    fn now_ms(&self) -> i64;
}
