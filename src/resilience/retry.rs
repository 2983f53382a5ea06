// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! Retries are driven by error classification: only Network, Timeout and
//! RateLimit errors are re-attempted. Auth and Validation errors return
//! immediately without consuming budget. Rate-limit errors honor a
//! server-provided delay when one is present.
//!
//! # Example
//!
//! ```
//! use storesync::RetryPolicy;
//! use std::time::Duration;
//!
//! // API fetches: a few quick attempts, then let the caller decide
//! let api = RetryPolicy::api();
//! assert_eq!(api.max_attempts, 3);
//!
//! // Startup connections: fail fast on bad config
//! let connect = RetryPolicy::connect();
//! assert_eq!(connect.max_attempts, 5);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::SyncError;

/// Per-call-type retry behavior.
///
/// Policies are attached to external-call types, not to jobs — the
/// job-level failure backoff is a separate, coarser mechanism owned by
/// the scheduler.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::api()
    }
}

impl RetryPolicy {
    /// Quick retry for platform API calls (don't block the pipeline).
    #[must_use]
    pub fn api() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(250),
        }
    }

    /// Patient retry for index writes (the sink rate-limits bursts).
    #[must_use]
    pub fn index() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
        }
    }

    /// Fast-fail retry for startup connections; detects configuration
    /// errors quickly instead of hanging.
    #[must_use]
    pub fn connect() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter: Duration::from_millis(100),
        }
    }

    /// Minimal delays for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: Duration::from_millis(1),
        }
    }

    /// Pre-jitter delay before the attempt after `attempt` failures
    /// (0-indexed): `base × multiplier^attempt`, capped at `max_delay`.
    ///
    /// Non-decreasing in `attempt` for any valid policy. The cap is
    /// applied in f64 space so large exponents cannot overflow
    /// `Duration`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(64) as i32).max(0.0);
        let secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay_for(attempt);
        }
        let extra = rand::Rng::gen_range(&mut rand::thread_rng(), 0..=jitter_ms);
        self.delay_for(attempt) + Duration::from_millis(extra)
    }
}

/// Run `operation`, retrying classified-retryable failures per `policy`.
///
/// Non-retryable errors (auth, validation, open circuit, lock busy) are
/// returned immediately without consuming retry budget.
pub async fn execute_with_retry<F, Fut, T>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempts = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempts > 0 {
                    info!(operation = label, attempts, "Operation succeeded after retries");
                }
                crate::metrics::record_retry_outcome(label, "success", attempts);
                return Ok(value);
            }
            Err(err) => {
                attempts += 1;

                if !err.is_retryable() {
                    crate::metrics::record_retry_outcome(label, "non_retryable", attempts);
                    return Err(err);
                }

                if attempts >= policy.max_attempts {
                    warn!(
                        operation = label,
                        attempts,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    crate::metrics::record_retry_outcome(label, "exhausted", attempts);
                    return Err(err);
                }

                // Honor the server's delay for rate limits, otherwise backoff
                let delay = err
                    .retry_after()
                    .unwrap_or_else(|| policy.jittered_delay(attempts - 1));

                warn!(
                    operation = label,
                    attempt = attempts,
                    max = policy.max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let result: Result<i32, SyncError> =
            execute_with_retry("test_op", &RetryPolicy::fast(), || async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, SyncError> = execute_with_retry(
            "test_op",
            &RetryPolicy::fast(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(SyncError::Network(format!("transient {}", count)))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, SyncError> = execute_with_retry(
            "test_op",
            &RetryPolicy::fast(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Timeout("always".into()))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(SyncError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, SyncError> = execute_with_retry(
            "test_op",
            &RetryPolicy::fast(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Auth("token revoked".into()))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(SyncError::Auth(_))));
        // One attempt only: no budget consumed on non-retryable errors
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_error_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, SyncError> = execute_with_retry(
            "test_op",
            &RetryPolicy::fast(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Validation("bad cursor".into()))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_honors_server_delay() {
        let start = std::time::Instant::now();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, SyncError> = execute_with_retry(
            "test_op",
            &RetryPolicy::fast(),
            || {
                let a = attempts_clone.clone();
                async move {
                    if a.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(SyncError::RateLimit {
                            retry_after: Some(Duration::from_millis(50)),
                        })
                    } else {
                        Ok(1)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_delay_exponential_growth() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 10.0,
            max_delay: Duration::from_secs(5),
            jitter: Duration::ZERO,
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(6), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_non_decreasing() {
        let policy = RetryPolicy::api();
        let mut previous = Duration::ZERO;
        for attempt in 0..16 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
    }
}
