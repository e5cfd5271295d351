// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry policy with fixed, progressive or exponential delays.
//!
//! A [`RetryPolicy`] is plain data: how many attempts, how long to wait
//! between them. The [`FallbackCoordinator`](super::fallback::FallbackCoordinator)
//! interprets it for source queries; [`retry`] interprets it for local store
//! operations where every error is worth another try.
//!
//! # Example
//!
//! ```
//! use inventory_tracker::resilience::retry::{Backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! // Progressive wait: interval × attempt
//! let policy = RetryPolicy::new(3, Duration::from_secs(600), Backoff::Linear);
//! assert_eq!(policy.delay_after(1), Duration::from_secs(600));
//! assert_eq!(policy.delay_after(2), Duration::from_secs(1200));
//!
//! // Startup: fail fast on bad config
//! let startup = RetryPolicy::startup();
//! assert_eq!(startup.max_attempts, 5);
//! ```

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{info, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Always `interval`
    Fixed,
    /// `interval × attempt`
    #[default]
    Linear,
    /// `interval × factor^(attempt - 1)`
    Exponential,
}

/// Attempts and spacing for a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
    /// Growth factor for [`Backoff::Exponential`]
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(600), Backoff::Linear)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff,
            factor: 2.0,
            max_delay: Duration::from_secs(24 * 3600),
        }
    }

    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self::new(max_attempts, interval, Backoff::Fixed)
    }

    /// Fast-fail retry for opening the local snapshot database.
    /// 5 attempts with exponential backoff, giving up after ~3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_millis(200),
            backoff: Backoff::Exponential,
            factor: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }

    /// Quick retry for individual local store reads.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            factor: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(1),
            backoff: Backoff::Exponential,
            factor: 2.0,
            max_delay: Duration::from_millis(10),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Linear => self.interval.saturating_mul(attempt),
            Backoff::Exponential => {
                let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                self.interval.mul_f64(self.factor.powi(exp).min(1e9))
            }
        };
        delay.min(self.max_delay)
    }

    /// Sum of all delays a fully failing operation would wait.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }
}

/// Retry `operation` on every error until the policy's attempts are used up.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(err);
                }

                let delay = policy.delay_after(attempts);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, policy.max_attempts, err, delay
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

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> =
            retry("test_op", &RetryPolicy::test(), || async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &RetryPolicy::test(), || {
            let a = attempts_clone.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(TestError(format!("fail {}", count)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &RetryPolicy::test(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(TestError("always fail".to_string()))
            }
        })
        .await;

        assert!(result.unwrap_err().0.contains("always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(4, Duration::from_secs(10));
        assert_eq!(policy.delay_after(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(10));
        assert_eq!(policy.total_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_linear_delay_is_progressive() {
        let policy = RetryPolicy::new(3, Duration::from_secs(600), Backoff::Linear);
        assert_eq!(policy.delay_after(1), Duration::from_secs(600));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1200));
        assert_eq!(policy.total_delay(), Duration::from_secs(1800));
    }

    #[test]
    fn test_exponential_delay_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 5,
            interval: Duration::from_secs(1),
            backoff: Backoff::Exponential,
            factor: 10.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.total_delay(), Duration::ZERO);
    }
}
