//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits consistent)
//! - Detect duplicate provider and operation class names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::{AuthMode, ResilienceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no enabled providers configured")]
    NoEnabledProviders,

    #[error("duplicate provider name `{0}`")]
    DuplicateProvider(String),

    #[error("provider `{name}` has an invalid url: {reason}")]
    InvalidUrl { name: String, reason: String },

    #[error("provider `{0}` uses header auth but has no api key")]
    MissingApiKey(String),

    #[error("provider `{0}` must allow at least one request per second and per minute")]
    ZeroRateLimit(String),

    #[error("provider `{0}` allows more requests per second than per minute")]
    InconsistentRateLimit(String),

    #[error("provider `{name}`: {field} must be greater than zero")]
    ZeroProviderDuration { name: String, field: &'static str },

    #[error("{0} must be greater than zero")]
    ZeroSetting(&'static str),

    #[error("retries.backoff_multiplier must be at least 1.0")]
    BackoffMultiplier,

    #[error("retries.max_backoff_ms is smaller than retries.initial_backoff_ms")]
    BackoffBounds,

    #[error("selection.reserve_capacity_percent must be below 100")]
    ReserveCapacity,

    #[error("duplicate operation class `{0}`")]
    DuplicateOperationClass(String),
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.providers.iter().any(|p| p.enabled) {
        errors.push(ValidationError::NoEnabledProviders);
    }

    let mut names = HashSet::new();
    for provider in &config.providers {
        if !names.insert(provider.name.as_str()) {
            errors.push(ValidationError::DuplicateProvider(provider.name.clone()));
        }

        if let Err(e) = Url::parse(&provider.url) {
            errors.push(ValidationError::InvalidUrl {
                name: provider.name.clone(),
                reason: e.to_string(),
            });
        }

        if provider.auth_mode == AuthMode::Header && provider.api_key.is_none() {
            errors.push(ValidationError::MissingApiKey(provider.name.clone()));
        }

        let limits = provider.rate_limit;
        if limits.per_second == 0 || limits.per_minute == 0 {
            errors.push(ValidationError::ZeroRateLimit(provider.name.clone()));
        } else if limits.per_second > limits.per_minute {
            errors.push(ValidationError::InconsistentRateLimit(provider.name.clone()));
        }

        if provider.timeout_ms == 0 {
            errors.push(ValidationError::ZeroProviderDuration {
                name: provider.name.clone(),
                field: "timeout_ms",
            });
        }
        if provider.health_check_interval_ms == 0 {
            errors.push(ValidationError::ZeroProviderDuration {
                name: provider.name.clone(),
                field: "health_check_interval_ms",
            });
        }
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::ZeroSetting("circuit_breaker.failure_threshold"));
    }
    if config.circuit_breaker.half_open_trial_count == 0 {
        errors.push(ValidationError::ZeroSetting("circuit_breaker.half_open_trial_count"));
    }

    let retries = &config.retries;
    if retries.backoff_multiplier.is_nan() || retries.backoff_multiplier < 1.0 {
        errors.push(ValidationError::BackoffMultiplier);
    }
    if retries.max_backoff_ms < retries.initial_backoff_ms {
        errors.push(ValidationError::BackoffBounds);
    }

    if config.selection.reserve_capacity_percent >= 100 {
        errors.push(ValidationError::ReserveCapacity);
    }

    if config.queue.max_concurrent == 0 {
        errors.push(ValidationError::ZeroSetting("queue.max_concurrent"));
    }
    if config.queue.capacity == 0 {
        errors.push(ValidationError::ZeroSetting("queue.capacity"));
    }
    if config.queue.prune_interval_ms == 0 {
        errors.push(ValidationError::ZeroSetting("queue.prune_interval_ms"));
    }
    if config.health_check.timeout_ms == 0 {
        errors.push(ValidationError::ZeroSetting("health_check.timeout_ms"));
    }
    if config.outcome_log.enabled && config.outcome_log.channel_capacity == 0 {
        errors.push(ValidationError::ZeroSetting("outcome_log.channel_capacity"));
    }

    let mut classes = HashSet::new();
    for class in &config.operation_classes {
        if !classes.insert(class.name.as_str()) {
            errors.push(ValidationError::DuplicateOperationClass(class.name.clone()));
        }
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
    use crate::config::schema::ProviderConfig;

    fn valid() -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.providers.push(ProviderConfig::new("a", "http://127.0.0.1:8899"));
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = valid();
        config.providers.push(ProviderConfig::new("a", "not a url"));
        config.providers[1].rate_limit.per_second = 0;
        config.retries.backoff_multiplier = 0.5;
        config.queue.max_concurrent = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateProvider("a".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidUrl { .. })));
        assert!(errors.contains(&ValidationError::ZeroRateLimit("a".into())));
        assert!(errors.contains(&ValidationError::BackoffMultiplier));
        assert!(errors.contains(&ValidationError::ZeroSetting("queue.max_concurrent")));
    }

    #[test]
    fn test_header_auth_requires_key() {
        let mut config = valid();
        config.providers[0].auth_mode = AuthMode::Header;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingApiKey("a".into())]);
    }

    #[test]
    fn test_requires_enabled_provider() {
        let mut config = valid();
        config.providers[0].enabled = false;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoEnabledProviders]);
    }
}
