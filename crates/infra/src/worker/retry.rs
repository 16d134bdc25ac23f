//! Retry policy for transiently failed jobs.

use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// `attempts` is the queue's count of failed attempts before the current one
/// (0 on first delivery). After a failure the job is requeued while
/// `attempts < max_retries`, with delay `min(base * multiplier^attempts, max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Fail permanently on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Check if another attempt is allowed after a failure at `attempts`.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Delay before the next attempt after a failure at `attempts`.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = self.multiplier.powi(attempts.min(i32::MAX as u32) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);
        if delay_ms.is_finite() {
            Duration::from_millis(delay_ms.max(0.0) as u64)
        } else {
            self.max_delay
        }
    }
}
