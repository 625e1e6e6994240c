//! Retry and backoff
//!
//! Every fallible edge that touches the identity provider or the durable store
//! goes through a [`RetryPolicy`]. Wrapped operations only fail past the
//! policy once the retry budget is exhausted, and then with the last error.

use crate::errors::CoordinatorError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Failures produced by the reliability layer itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReliabilityError {
    /// Operation did not complete within its budget
    #[error("operation {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation label
        operation: &'static str,
        /// Budget that elapsed
        timeout_ms: u64,
    },
}

impl From<ReliabilityError> for CoordinatorError {
    fn from(err: ReliabilityError) -> Self {
        match err {
            ReliabilityError::Timeout { timeout_ms, .. } => CoordinatorError::Timeout { timeout_ms },
        }
    }
}

/// Race `future` against `limit`
pub async fn with_timeout<F: Future>(
    operation: &'static str,
    limit: Duration,
    future: F,
) -> Result<F::Output, ReliabilityError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ReliabilityError::Timeout {
            operation,
            timeout_ms: limit.as_millis() as u64,
        })
}

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase: delay * attempt
    Linear,
    /// Exponential increase: delay * 2^(attempt-1)
    Exponential,
}

impl BackoffStrategy {
    /// Un-jittered delay before retry number `attempt` (1-based)
    pub fn base_delay(&self, attempt: u32, initial_delay: Duration) -> Duration {
        let attempt = attempt.max(1);
        match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                initial_delay.saturating_mul(2u32.saturating_pow(attempt - 1))
            }
        }
    }
}

/// Ephemeral record of one scheduled retry
///
/// Lives for a single retry loop invocation and is only ever logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAttempt {
    /// Operation label, e.g. `"refresh-credential"`
    pub operation_kind: &'static str,
    /// Retry number (1-based)
    pub attempt_number: u32,
    /// Delay before the retry runs
    pub next_delay: Duration,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Backoff strategy to use
    pub strategy: BackoffStrategy,
    /// Jitter fraction in `[0, 1]`; each delay is scaled by `1 ± jitter`
    pub jitter: f64,
}

impl RetryPolicy {
    /// Exponential backoff with the coordinator defaults
    pub fn exponential() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }

    /// Fixed delay between retries
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_retries: 3,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Single attempt, never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::exponential()
        }
    }

    /// Set maximum retries
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set jitter fraction (clamped to `[0, 1]`)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (1-based)
    ///
    /// `min(base * 2^(attempt-1) * (1 ± jitter), max_delay)` for the
    /// exponential strategy.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.strategy.base_delay(attempt, self.base_delay);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return base.min(self.max_delay);
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        // Work in f64 so a saturated base cannot overflow when scaled.
        let secs = (base.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Execute an async operation, retrying every failure
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_kind: &'static str,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_if(operation_kind, operation, |_| true).await
    }

    /// Execute an async operation, retrying only failures `should_retry` accepts
    ///
    /// A failure the predicate rejects is returned immediately.
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        operation_kind: &'static str,
        operation: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        self.execute_with_context(operation_kind, operation, should_retry)
            .await
            .into_result()
    }

    /// Execute with retry and return attempt statistics alongside the result
    pub async fn execute_with_context<F, Fut, T, E, P>(
        &self,
        operation_kind: &'static str,
        mut operation: F,
        mut should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let start = Instant::now();
        let mut retries = 0;
        let mut total_delay = Duration::ZERO;

        loop {
            match operation().await {
                Ok(result) => {
                    return RetryResult {
                        result: Ok(result),
                        attempts: retries + 1,
                        total_duration: start.elapsed(),
                        total_retry_delay: total_delay,
                    };
                }
                Err(err) => {
                    if retries >= self.max_retries || !should_retry(&err) {
                        return RetryResult {
                            result: Err(err),
                            attempts: retries + 1,
                            total_duration: start.elapsed(),
                            total_retry_delay: total_delay,
                        };
                    }

                    retries += 1;
                    let attempt = RecoveryAttempt {
                        operation_kind,
                        attempt_number: retries,
                        next_delay: self.calculate_delay(retries),
                    };
                    debug!(
                        operation = attempt.operation_kind,
                        attempt = attempt.attempt_number,
                        delay_ms = attempt.next_delay.as_millis() as u64,
                        "retrying after failure"
                    );
                    total_delay += attempt.next_delay;
                    tokio::time::sleep(attempt.next_delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

/// Result of a retry operation with statistics
#[derive(Debug, Clone)]
pub struct RetryResult<T, E> {
    /// Final result (success or last failure)
    pub result: Result<T, E>,
    /// Number of attempts made, including the first
    pub attempts: u32,
    /// Total duration including retries
    pub total_duration: Duration,
    /// Total time spent waiting between retries
    pub total_retry_delay: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Check if operation succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Check if any retries were performed
    pub fn had_retries(&self) -> bool {
        self.attempts > 1
    }

    /// Get the result
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delays_double_until_capped() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(350));
        assert_eq!(policy.calculate_delay(30), Duration::from_millis(350));
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(0.25);

        for _ in 0..100 {
            let delay = policy.calculate_delay(2);
            assert!(delay >= Duration::from_millis(1500), "{delay:?}");
            assert!(delay <= Duration::from_millis(2500), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn execute_rethrows_last_error_after_exhaustion() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(Duration::from_millis(10)).with_max_retries(2);

        let result: Result<(), String> = policy
            .execute("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {n}")) }
            })
            .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_stops_on_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(Duration::from_millis(10)).with_max_retries(5);

        let outcome = policy
            .execute_with_context(
                "test",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("not yet")
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert!(outcome.is_success());
        assert!(outcome.had_retries());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.total_retry_delay, Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_reports_budget() {
        let err = with_timeout("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await
        .unwrap_err();
        assert_eq!(
            err,
            ReliabilityError::Timeout {
                operation: "slow",
                timeout_ms: 50
            }
        );
        assert_eq!(
            CoordinatorError::from(err).class(),
            crate::errors::ErrorClass::Timeout
        );

        let fast = with_timeout("fast", Duration::from_millis(50), async { 7 }).await;
        assert_eq!(fast, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_if_does_not_retry_rejected_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(Duration::from_millis(10)).with_max_retries(5);

        let result: Result<(), &str> = policy
            .execute_if(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
                |err| *err != "fatal",
            )
            .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
