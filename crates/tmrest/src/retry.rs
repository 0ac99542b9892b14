//! Retry logic with exponential backoff for transient read errors.
//!
//! Only idempotent reads go through here. Writes are never retried at the
//! transport layer, a half-applied transaction must surface as an error.

use crate::error::{ErrorCategory, is_retryable};
use reconcile::CallResult;
use std::thread;
use std::time::Duration;

/// Retry policy for reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// The result always lies between zero and `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if delay.is_nan() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(delay.clamp(0.0, max))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once all attempts are used up.
pub fn with_retry<T, F>(config: &RetryConfig, what: &str, mut operation: F) -> CallResult<T>
where
    F: FnMut() -> CallResult<T>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) || attempt + 1 >= attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                log::warn!(
                    "{what}: attempt {}/{attempts} failed ({}: {e}), retrying in {delay:?}",
                    attempt + 1,
                    ErrorCategory::of(&e)
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
