//! Exponential backoff with jitter for idempotent ledger reads
//!
//! Submission is never routed through here: resending a signed transaction
//! is the broadcast loop's decision, not the transport's.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry configuration with jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including initial attempt)
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 5000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Backoff delay for a given attempt (0-indexed)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp_backoff = (self.base_backoff_ms as f64) * 2_f64.powi(attempt as i32);
        let capped = exp_backoff.min(self.max_backoff_ms as f64);

        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Retry an async operation while its error is transient
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let start = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                debug!(operation = operation_name, error = %err, "Permanent error, not retrying");
                return Err(err);
            }
            Err(err) if attempt + 1 >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    error = %err,
                    "All retry attempts exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let backoff = config.backoff(attempt);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient error, backing off before retry"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(bool);

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient={})", self.0)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_with_backoff("op", &fast(), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TestError(true))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff("op", &fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError(false))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff("op", &fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError(true))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(8), Duration::from_millis(1000));
    }
}
