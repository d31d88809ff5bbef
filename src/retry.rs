//! Central retry driver for retryable errors.
//!
//! Mirrors the exponential-backoff shape used throughout the corpus for
//! cross-chain RPC calls: a bounded number of attempts, a base delay
//! multiplied geometrically and capped at a maximum.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Backoff policy for a retry driver.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Record of a single retry attempt, kept for audit logs.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: Option<String>,
}

/// Drives an async operation through [`RetryPolicy`], retrying only
/// errors for which [`Error::retryable`] returns true. Non-retryable
/// errors propagate immediately.
pub struct RetryDriver {
    policy: RetryPolicy,
}

impl RetryDriver {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `op`, retrying retryable errors with exponential backoff.
    /// Returns the final result and the list of attempts made (for audit
    /// logging by the coordinators).
    pub async fn run<T, F, Fut>(&self, mut op: F) -> (Result<T>, Vec<AttemptRecord>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = Vec::new();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        error: None,
                    });
                    return (Ok(value), attempts);
                }
                Err(err) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        error: Some(err.to_string()),
                    });
                    if !err.retryable() || attempt >= self.policy.max_attempts {
                        return (Err(err), attempts);
                    }
                    log::warn!(
                        "retryable error on attempt {attempt}/{}: {err}",
                        self.policy.max_attempts
                    );
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

impl Default for RetryDriver {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let driver = RetryDriver::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(5),
            max_attempts: 5,
        });
        let calls = AtomicU32::new(0);

        let (result, attempts) = driver
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Network(NetworkError::Generic("flaky".into())))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.len(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let driver = RetryDriver::default();
        let calls = AtomicU32::new(0);

        let (result, attempts) = driver
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Swap(crate::error::SwapError::InvalidIntent(
                    "bad".into(),
                )))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let driver = RetryDriver::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(2),
            max_attempts: 3,
        });

        let (result, attempts) = driver
            .run(|| async { Err::<(), _>(Error::Network(NetworkError::Timeout)) })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.len(), 3);
    }
}
