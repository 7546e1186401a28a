//! Retry policy for remote requests
//!
//! The default policy retries forever with no delay between attempts. A bounded
//! policy gives up after `max_attempts` and the worker finishes the unit as
//! `failed`.

use crate::config::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// None retries forever
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    /// None leaves the delay uncapped
    pub max_backoff: Option<Duration>,
}

impl RetryPolicy {
    /// Retry forever, immediately
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: None,
        }
    }

    /// At most `attempts` tries per request, immediately
    pub fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Self::unlimited()
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: (config.max_attempts > 0).then_some(config.max_attempts),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier,
            max_backoff: (config.max_backoff_ms > 0)
                .then(|| Duration::from_millis(config.max_backoff_ms)),
        }
    }

    /// Whether another attempt may follow `failed_attempts` failures
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => failed_attempts < max,
        }
    }

    /// Delay before the next attempt after `failed_attempts` failures (>= 1)
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }

        let exponent = failed_attempts.saturating_sub(1).min(63) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = if secs.is_finite() && secs < u64::MAX as f64 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::MAX
        };

        match self.max_backoff {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unlimited()
    }
}
