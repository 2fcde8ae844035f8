//! Retry policy for failing steps.
//!
//! A step that reports `success == false` is attempted again until it
//! succeeds or `max_retries + 1` attempts have been made. The delay between
//! attempts is zero unless configured, growing by a multiplier per retry and
//! capped at `max_delay`.

use std::time::Duration;

use stepwise_types::config::EngineConfig;

/// Retry budget and backoff schedule for one workflow execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Retry up to `max_retries` times with no delay.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Retry budget from the definition, backoff schedule from configuration.
    pub fn from_config(max_retries: u32, config: &EngineConfig) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(config.retry_backoff_ms),
            multiplier: config.retry_backoff_multiplier,
            max_delay: Duration::from_millis(config.max_retry_backoff_ms),
        }
    }

    /// Total attempts allowed for a step, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt follows a failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Delay to wait after failed `attempt` (1-based) before the next one.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);

        Duration::from_millis(millis as u64)
    }
}
