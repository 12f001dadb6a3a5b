//! Retry policy: bounded exponential backoff without jitter.
//!
//! `RetryConfig::delay_for_attempt` is the single source of the wait
//! durations. The retry middleware uses the `backon` builder only to bound
//! the number of attempts.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_interval_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Delay cap.
    pub max_interval_ms: u64,
    /// Total handler invocations per message, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1000,
            multiplier: 2.0,
            max_interval_ms: 120_000,
            max_attempts: 100,
        }
    }
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Wait after failed attempt `attempt` (1-indexed):
    /// `min(initial * multiplier^(attempt-1), max)`.
    ///
    /// Attempt 0 has no preceding failure and yields zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_ms = self.initial_interval_ms as f64 * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_interval_ms as f64);

        Duration::from_millis(capped_ms as u64)
    }

    /// `backon` builder yielding `max_attempts - 1` delays. backon multiplies
    /// in `f32`, so its delays can drift from [`Self::delay_for_attempt`] by
    /// rounding; use it for the attempt bound, not the wait.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_interval())
            .with_max_delay(self.max_interval())
            .with_factor(self.multiplier as f32)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_interval_ms ({}) is below retry.initial_interval_ms ({})",
                self.max_interval_ms, self.initial_interval_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
