//! Retry-until-success-or-deadline for store calls.
//!
//! An operation is re-run with growing delays for as long as the predicate
//! classifies its error as retryable and the deadline has not elapsed.
//! Errors the predicate rejects surface immediately as [`RetryError::Fatal`];
//! running out of time yields [`RetryError::Timeout`] carrying the last error.

use std::future::Future;
use std::time::Duration;

use common::config::RetryConfig;
use tokio::time::Instant;

use crate::error::{RetryError, StoreError};

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Rate limiting by the store.
pub fn is_quota_error(err: &StoreError) -> bool {
    matches!(err, StoreError::QuotaExceeded(_))
}

/// Network and server-side hiccups.
pub fn is_transient_error(err: &StoreError) -> bool {
    matches!(err, StoreError::Transient(_))
}

/// Not found. Only meaningful for reads issued shortly after a write; a
/// delete that finds nothing has already succeeded.
pub fn is_not_found_error(err: &StoreError) -> bool {
    matches!(err, StoreError::NotFound(_))
}

/// Predicate for listings and deletes.
pub fn is_retryable_write(err: &StoreError) -> bool {
    is_quota_error(err) || is_transient_error(err)
}

/// Predicate for reads racing a preceding write.
pub fn is_retryable_read(err: &StoreError) -> bool {
    is_retryable_write(err) || is_not_found_error(err)
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or `timeout` elapses.
pub async fn retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    timeout: Duration,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    P: Fn(&StoreError) -> bool,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(attempts, "Store call succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(RetryError::Fatal(err));
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            tracing::warn!(
                attempts,
                timeout = ?timeout,
                error = %err,
                "Giving up on store call, deadline exceeded"
            );
            return Err(RetryError::Timeout {
                timeout,
                attempts,
                last: err,
            });
        }

        let delay = policy.backoff(attempts).min(timeout - elapsed);
        tracing::debug!(
            attempt = attempts,
            delay = ?delay,
            error = %err,
            "Retryable store error, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = fast_policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_secs(1));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_predicates() {
        let quota = StoreError::QuotaExceeded("429".into());
        let transient = StoreError::Transient("503".into());
        let missing = StoreError::NotFound("a/".into());
        let fatal = StoreError::Fatal("403".into());
        let conflict = StoreError::Conflict("not empty".into());

        assert!(is_quota_error(&quota));
        assert!(!is_quota_error(&transient));

        assert!(is_retryable_write(&quota));
        assert!(is_retryable_write(&transient));
        assert!(!is_retryable_write(&missing));
        assert!(!is_retryable_write(&fatal));
        assert!(!is_retryable_write(&conflict));

        assert!(is_retryable_read(&missing));
        assert!(!is_retryable_read(&fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_quota_errors() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry(
            &fast_policy(),
            Duration::from_secs(60),
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(StoreError::QuotaExceeded("slow down".into()))
                    } else {
                        Ok(7)
                    }
                }
            },
            is_quota_error,
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_fatal_immediately() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry(
            &fast_policy(),
            Duration::from_secs(60),
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Fatal("permission denied".into()))
                }
            },
            is_quota_error,
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError::Fatal(StoreError::Fatal(
                "permission denied".into()
            )))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_quota_error_times_out_with_last_cause() {
        let started = Instant::now();

        let result: Result<(), _> = retry(
            &fast_policy(),
            Duration::from_secs(5),
            || async { Err(StoreError::QuotaExceeded("429".into())) },
            is_quota_error,
        )
        .await;

        match result {
            Err(RetryError::Timeout {
                timeout,
                attempts,
                last,
            }) => {
                assert_eq!(timeout, Duration::from_secs(5));
                assert!(attempts > 1);
                assert_eq!(last, StoreError::QuotaExceeded("429".into()));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        // Sleeps are clipped to the deadline
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_makes_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry(
            &fast_policy(),
            Duration::ZERO,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Transient("reset".into()))
                }
            },
            is_retryable_write,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Timeout { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
