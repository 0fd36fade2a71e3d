//! Retry policy: bounded exponential backoff for transient fetch failures.

use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use crate::error::FetchResult;
use crate::traits::VariantFetcher;

/// How often and how patiently to retry a failed fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` means no retry.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// `max_attempts` tries, doubling the delay each time.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2.0,
        }
    }

    /// Delay after `attempts` failed attempts (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Fetch `locator`, retrying transient failures per `policy`.
///
/// Returns the last error once attempts run out or a permanent error is
/// seen. Callers bound the total time with their own timeout.
pub async fn fetch_with_retry(
    fetcher: &dyn VariantFetcher,
    locator: &str,
    policy: &RetryPolicy,
) -> FetchResult<Bytes> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match fetcher.fetch(locator).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transient() && attempts < policy.max_attempts => {
                let delay = policy.next_delay(attempts);
                warn!(
                    locator,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient fetch failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
