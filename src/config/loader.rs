//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ResilienceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ResilienceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse, resolve and validate configuration text.
pub fn parse_config(content: &str) -> Result<ResilienceConfig, ConfigError> {
    let mut config: ResilienceConfig = toml::from_str(content)?;
    resolve_api_keys(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Fill `api_key` from `api_key_env` where the key is not set inline.
fn resolve_api_keys(config: &mut ResilienceConfig) {
    for provider in &mut config.providers {
        if provider.api_key.is_some() {
            continue;
        }
        if let Some(var) = &provider.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.is_empty() => provider.api_key = Some(key),
                _ => tracing::warn!(provider = %provider.name, env = %var, "API key environment variable not set"),
            }
        }
    }
}
