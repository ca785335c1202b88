//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the watch core.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Control-plane namespace used for every watch and query.
    pub namespace: String,

    /// Retry configuration for control-plane calls.
    pub retry: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Polling intervals.
    pub watch: PollConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            watch: PollConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate at which the breaker opens.
    pub threshold: f64,

    /// How long the breaker stays open before probing, in seconds.
    pub open_duration_secs: u64,

    /// Successful probes needed to close from half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            open_duration_secs: 30,
            half_open_max_probes: 1,
        }
    }
}

/// Polling intervals for watchers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    /// Service instance poll interval in seconds.
    pub service_interval_secs: u64,

    /// Configuration file poll interval in seconds.
    pub config_interval_secs: u64,
}

impl PollConfig {
    pub fn service_interval(&self) -> Duration {
        Duration::from_secs(self.service_interval_secs)
    }

    pub fn config_interval(&self) -> Duration {
        Duration::from_secs(self.config_interval_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            service_interval_secs: 10,
            config_interval_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit_breaker.threshold, 0.5);
        assert_eq!(config.watch.service_interval(), Duration::from_secs(10));
        assert_eq!(config.watch.config_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: WatchConfig = toml::from_str(
            r#"
            namespace = "prod"

            [retry]
            max_attempts = 5

            [watch]
            service_interval_secs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace, "prod");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.watch.service_interval_secs, 3);
        assert_eq!(config.watch.config_interval_secs, 30);
        assert_eq!(config.observability.log_level, "info");
    }
}
