//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (retry bounds, breaker threshold, poll intervals)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::WatchConfig;

const MAX_RETRY_ATTEMPTS: u32 = 10;
const MIN_RETRY_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY_MS: u64 = 30_000;
const MIN_BREAKER_THRESHOLD: f64 = 0.1;
const MAX_BREAKER_THRESHOLD: f64 = 0.9;

/// A single semantic violation, naming the offending field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check every semantic constraint, collecting all violations.
pub fn validate_config(config: &WatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.namespace.trim().is_empty() {
        errors.push(ValidationError::new("namespace", "must not be empty"));
    }

    let retry = &config.retry;
    if retry.max_attempts > MAX_RETRY_ATTEMPTS {
        errors.push(ValidationError::new(
            "retry.max_attempts",
            format!("must be at most {}, got {}", MAX_RETRY_ATTEMPTS, retry.max_attempts),
        ));
    }
    if !(MIN_RETRY_DELAY_MS..=MAX_RETRY_DELAY_MS).contains(&retry.base_delay_ms) {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            format!(
                "must be between {} and {}, got {}",
                MIN_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS, retry.base_delay_ms
            ),
        ));
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.multiplier",
            format!("must be >= 1.0, got {}", retry.multiplier),
        ));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        errors.push(ValidationError::new(
            "retry.max_delay_ms",
            format!(
                "must be >= base_delay_ms ({}), got {}",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        ));
    }

    let breaker = &config.circuit_breaker;
    if !(MIN_BREAKER_THRESHOLD..=MAX_BREAKER_THRESHOLD).contains(&breaker.threshold) {
        errors.push(ValidationError::new(
            "circuit_breaker.threshold",
            format!(
                "must be between {} and {}, got {}",
                MIN_BREAKER_THRESHOLD, MAX_BREAKER_THRESHOLD, breaker.threshold
            ),
        ));
    }
    if breaker.open_duration_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.open_duration_secs", "must be > 0"));
    }
    if breaker.half_open_max_probes == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_probes", "must be >= 1"));
    }

    if config.watch.service_interval_secs == 0 {
        errors.push(ValidationError::new("watch.service_interval_secs", "must be >= 1"));
    }
    if config.watch.config_interval_secs == 0 {
        errors.push(ValidationError::new("watch.config_interval_secs", "must be >= 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&WatchConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = WatchConfig::default();
        config.namespace = " ".to_string();
        config.retry.max_attempts = 11;
        config.retry.multiplier = 0.5;
        config.circuit_breaker.threshold = 0.95;
        config.watch.config_interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "namespace",
                "retry.max_attempts",
                "retry.multiplier",
                "circuit_breaker.threshold",
                "watch.config_interval_secs",
            ]
        );
    }

    #[test]
    fn test_max_delay_below_base() {
        let mut config = WatchConfig::default();
        config.retry.base_delay_ms = 2000;
        config.retry.max_delay_ms = 1000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "retry.max_delay_ms");
        assert!(errors[0].to_string().contains("base_delay_ms (2000)"));
    }
}
