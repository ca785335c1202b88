//! Exponential backoff with optional jitter.

use std::time::Duration;
use rand::Rng;
use thiserror::Error;

use crate::config::RetryConfig;

/// Rejected backoff parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidBackoff {
    #[error("multiplier must be >= 1.0, got {0}")]
    Multiplier(f64),

    #[error("max interval {max:?} is below base interval {base:?}")]
    MaxBelowBase { base: Duration, max: Duration },
}

/// Delay schedule for retries: `min(base * multiplier^attempt, max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_attempts: u32,
    jitter: bool,
}

impl BackoffPolicy {
    /// Build a policy, checking `multiplier >= 1` and `max_interval >= base_interval`.
    pub fn new(
        base_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_attempts: u32,
    ) -> Result<Self, InvalidBackoff> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(InvalidBackoff::Multiplier(multiplier));
        }
        if max_interval < base_interval {
            return Err(InvalidBackoff::MaxBelowBase {
                base: base_interval,
                max: max_interval,
            });
        }
        Ok(Self {
            base_interval,
            multiplier,
            max_interval,
            max_attempts,
            jitter: false,
        })
    }

    /// Add up to 10% random extra delay to each wait, still capped at `max_interval`.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build a policy from the `[retry]` config section.
    pub fn from_config(config: &RetryConfig) -> Result<Self, InvalidBackoff> {
        Ok(Self::new(
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )?
        .with_jitter(config.jitter))
    }

    /// Number of retries after the first call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = calculate_backoff(attempt, self.base_interval, self.multiplier, self.max_interval);
        if !self.jitter {
            return delay;
        }

        let jitter_range = delay.as_millis() as u64 / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };
        (delay + Duration::from_millis(jitter)).min(self.max_interval)
    }
}

/// Calculate the capped exponential delay for a 0-based attempt.
pub fn calculate_backoff(attempt: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * multiplier.powi(exponent);

    // powi overflows to +inf for large attempts
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(secs)
}
