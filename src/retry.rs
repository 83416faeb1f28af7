//! Bounded retry with exponential backoff, driven by `backon`.
//!
//! Transient failures (see [`classify`]) are retried up to
//! `max_retries` times. Rate-limited responses that carry a reset header
//! wait for the reset instead of the exponential delay, capped at a minute.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::{classify, ApiError, ErrorClass};

/// Longest wait honoured for a rate-limit reset.
const MAX_RATE_LIMIT_WAIT_SECS: i64 = 60;
/// Shortest wait honoured for a rate-limit reset.
const MIN_RATE_LIMIT_WAIT_SECS: i64 = 1;
/// Jitter spread applied on either side of the computed delay.
const JITTER_FRACTION: f64 = 0.25;

/// Backoff configuration for one retry site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
    /// Spread each delay by ±25%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter: false,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Exponential delay for a zero-indexed retry attempt: `base * 2^attempt`.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor)
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = ExponentialBackoff;

    fn build(self) -> Self::Backoff {
        ExponentialBackoff {
            policy: self,
            attempt: 0,
        }
    }
}

/// Yields `base * 2^n` for each of the policy's retries, then stops.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.exponential_delay(self.attempt);
        self.attempt += 1;
        Some(if self.policy.jitter {
            apply_jitter(delay)
        } else {
            delay
        })
    }
}

/// Seconds until `reset`, clamped to `[1, 60]`.
pub fn rate_limit_wait(reset: i64, now: DateTime<Utc>) -> Duration {
    let secs = (reset - now.timestamp()).clamp(MIN_RATE_LIMIT_WAIT_SECS, MAX_RATE_LIMIT_WAIT_SECS);
    Duration::from_secs(secs as u64)
}

/// The wait a rate-limited `error` asks for, if it carries a reset time.
fn rate_limit_delay(error: &ApiError, now: DateTime<Utc>) -> Option<Duration> {
    if !error.is_rate_limited() {
        return None;
    }
    error
        .rate_limit()
        .and_then(|info| info.reset)
        .map(|reset| rate_limit_wait(reset, now))
}

/// Replaces the backoff's next delay with the rate-limit wait when there
/// is one. An exhausted backoff stays exhausted.
fn adjust_delay(error: &ApiError, next: Option<Duration>, now: DateTime<Utc>) -> Option<Duration> {
    let next = next?;
    Some(rate_limit_delay(error, now).unwrap_or(next))
}

fn apply_jitter(delay: Duration) -> Duration {
    let factor = rand::rng().random_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
    delay.mul_f64(factor)
}

/// Runs `operation` until it succeeds, fails fatally, or runs out of retries.
///
/// The last error is always returned to the caller on exhaustion.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_retries = policy.max_retries;
    let mut retries: u32 = 0;

    operation
        .retry(*policy)
        .when(|err: &ApiError| {
            let transient = classify(err) == ErrorClass::Transient;
            if !transient {
                tracing::debug!(label, error = %err, "Fatal error, not retrying");
            }
            transient
        })
        .adjust(|err: &ApiError, next: Option<Duration>| {
            let delay = adjust_delay(err, next, Utc::now());
            if delay.is_none() {
                tracing::warn!(label, attempts = max_retries + 1, error = %err, "Retries exhausted");
            }
            delay
        })
        .notify(|err: &ApiError, delay: Duration| {
            retries += 1;
            tracing::warn!(
                label,
                attempt = retries,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient error, retrying"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitInfo;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status_error(status: u16, rate_limit: RateLimitInfo) -> ApiError {
        ApiError::Status {
            status,
            message: "boom".to_string(),
            rate_limit,
        }
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.exponential_delay(0), Duration::from_secs(1));
        assert_eq!(policy.exponential_delay(1), Duration::from_secs(2));
        assert_eq!(policy.exponential_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_yields_one_delay_per_retry() {
        let delays: Vec<Duration> = RetryPolicy::new(3, Duration::from_secs(1)).build().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).build().count(), 0);
    }

    #[test]
    fn test_rate_limit_reset_takes_precedence() {
        let now = Utc::now();
        let err = status_error(
            429,
            RateLimitInfo {
                remaining: Some(0),
                reset: Some(now.timestamp() + 10),
            },
        );
        assert_eq!(
            adjust_delay(&err, Some(Duration::from_secs(4)), now),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_exhausted_backoff_ignores_rate_limit_reset() {
        let now = Utc::now();
        let err = status_error(
            429,
            RateLimitInfo {
                remaining: Some(0),
                reset: Some(now.timestamp() + 10),
            },
        );
        assert_eq!(adjust_delay(&err, None, now), None);
    }

    #[test]
    fn test_rate_limit_wait_is_clamped() {
        let now = Utc::now();
        assert_eq!(
            rate_limit_wait(now.timestamp() + 3600, now),
            Duration::from_secs(60)
        );
        assert_eq!(
            rate_limit_wait(now.timestamp() - 30, now),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_rate_limit_without_reset_keeps_exponential_delay() {
        let err = status_error(429, RateLimitInfo::default());
        assert_eq!(
            adjust_delay(&err, Some(Duration::from_secs(2)), Utc::now()),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1)).with_jitter(true);
        for _ in 0..100 {
            let delay = policy.build().nth(2).unwrap();
            assert!(delay >= Duration::from_secs(3), "{delay:?}");
            assert!(delay <= Duration::from_secs(5), "{delay:?}");
        }
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(status_error(502, RateLimitInfo::default()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_fatal_errors() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(status_error(404, RateLimitInfo::default()))
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_surfaces_last_error_on_exhaustion() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(status_error(500 + n as u16, RateLimitInfo::default()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().status(), Some(502));
    }
}
