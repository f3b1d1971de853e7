//! Exponential backoff for transient failures.
//!
//! The store wraps every event bus publish in [`retry_with_backoff`]. A publish that
//! still fails after the last attempt is handed back to the caller together with the
//! number of attempts, so it can be parked in the dead letter queue.
//!
//! # Example
//!
//! ```
//! use restbucks_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(50));
//!
//! assert!(policy.should_retry(2));
//! assert!(!policy.should_retry(3));
//! ```

use crate::metrics::RetryMetrics;
use std::future::Future;
use std::time::Duration;

/// Retry policy with exponential backoff and jitter.
///
/// Defaults:
/// - `max_attempts`: 5 (including the first attempt)
/// - `initial_delay`: 100ms
/// - `max_delay`: 10 seconds
/// - `backoff_multiplier`: 2.0
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a policy with the default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    /// A policy that tries once and never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new().with_max_attempts(1)
    }

    /// Set the maximum number of attempts (values below 1 are treated as 1).
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap for exponential backoff.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `min(initial_delay * multiplier^attempt, max_delay)`, scaled by a random
    /// factor in `[0.5, 1.0]` so that concurrent retries spread out.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(capped_secs * jitter)
    }

    /// Maximum number of attempts, including the first one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempts` tries.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// The last error of an operation that ran out of attempts.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Error returned by the final attempt
    pub error: E,
    /// How many times the operation ran
    pub attempts: u32,
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// `operation_name` labels the log lines and the retry counters.
///
/// # Errors
///
/// Returns [`RetryExhausted`] with the final error once `policy.max_attempts()`
/// attempts have failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    RetryMetrics::record_success(operation_name);
                    tracing::info!(
                        operation = operation_name,
                        attempts,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            },
            Err(error) => {
                if !policy.should_retry(attempts) {
                    RetryMetrics::record_exhausted(operation_name);
                    tracing::error!(
                        operation = operation_name,
                        attempts,
                        error = %error,
                        "Operation failed after exhausting retries"
                    );
                    return Err(RetryExhausted { error, attempts });
                }

                let delay = policy.delay_for_attempt(attempts - 1);
                RetryMetrics::record_attempt(operation_name);
                tracing::warn!(
                    operation = operation_name,
                    attempts,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Operation failed, retrying after delay"
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300));

        let first = policy.delay_for_attempt(0);
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

        let capped = policy.delay_for_attempt(10);
        assert!(capped <= Duration::from_millis(300));
        assert!(capped >= Duration::from_millis(150));
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = RetryPolicy::new().with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&fast_policy(5), "flaky", || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_with_backoff(&fast_policy(3), "broken", || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("down")
            }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.error, "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
