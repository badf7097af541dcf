//! Bounded exponential backoff with jitter and a per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::SagaError;
use crate::services::ServiceError;

/// Failures the retry loop knows how to classify.
pub trait Retryable {
    /// Returns true if another attempt may succeed.
    fn is_transient(&self) -> bool;

    /// The failure recorded when an attempt exceeds the step timeout.
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for ServiceError {
    fn is_transient(&self) -> bool {
        ServiceError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        ServiceError::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }
}

impl Retryable for SagaError {
    fn is_transient(&self) -> bool {
        SagaError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        SagaError::Service(ServiceError::timed_out(after))
    }
}

/// Retry configuration for one saga step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry (before jitter).
    pub base_delay: Duration,
    /// Multiplier applied to the delay after every retry.
    pub factor: u32,
    /// Upper bound on any single delay (before jitter).
    pub max_delay: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Jitter factor: the delay is scaled by a random value in [1-jitter, 1+jitter].
    pub jitter: f64,
    /// Time allowed for one attempt before it counts as a transient failure.
    pub step_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            factor: 2,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
            jitter: 0.2,
            step_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a retried step together with the number of attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E: std::fmt::Display> RetryOutcome<T, E> {
    /// The last failure as text, if the step failed.
    pub fn last_error(&self) -> Option<String> {
        self.result.as_ref().err().map(ToString::to_string)
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts,
            jitter: 0.0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-indexed): `base * factor^retry`,
    /// capped at `max_delay`, then jittered.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let multiplier = u64::from(self.factor.max(1)).saturating_pow(retry.min(20));
        let capped_ms = base_ms
            .saturating_mul(multiplier)
            .min(self.max_delay.as_millis() as u64);

        if self.jitter <= 0.0 || capped_ms == 0 {
            return Duration::from_millis(capped_ms);
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        Duration::from_millis((capped_ms as f64 * factor) as u64)
    }

    /// Runs `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Each attempt is bounded by `step_timeout`; a timeout counts as a
    /// transient failure.
    pub async fn run<T, E, F, Fut>(&self, step: &'static str, mut op: F) -> RetryOutcome<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.step_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(self.step_timeout)),
            };

            match result {
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    let delay = self.delay_for_attempt(attempts - 1);
                    tracing::warn!(
                        step,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "saga step failed, retrying"
                    );
                    metrics::counter!("sale_step_retries_total", "step" => step).increment(1);
                    tokio::time::sleep(delay).await;
                }
                result => return RetryOutcome { result, attempts },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delay_doubles_without_jitter() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            jitter: 0.0,
            max_delay: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0).as_millis();
            assert!((159..=240).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let outcome = RetryPolicy::immediate(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::Transient("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), _> = RetryPolicy::immediate(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Transient("down".into()))
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.last_error().unwrap().contains("down"));
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), _> = RetryPolicy::immediate(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Rejected("no".into()))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            step_timeout: Duration::from_millis(10),
            ..RetryPolicy::immediate(2)
        };
        let outcome: RetryOutcome<(), ServiceError> = policy
            .run("slow", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert!(matches!(
            outcome.result,
            Err(ServiceError::Timeout { after_ms: 10 })
        ));
    }
}
