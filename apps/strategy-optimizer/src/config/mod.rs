//! Configuration module for the strategy optimizer.
//!
//! Loads a YAML file, interpolates environment variables and validates the
//! result before anything is wired up.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strategy_optimizer::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("deploy/optimizer.yaml"))?;
//!
//! println!("engine: {}", config.engine.base_url);
//! ```

mod engine;
mod observability;
mod persistence;
mod scheduler;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{EngineConfig, RetryConfig};
pub use observability::{LogFormat, LoggingConfig, MetricsConfig, ObservabilityConfig};
pub use persistence::{PersistenceConfig, StoreBackend};
pub use scheduler::SchedulerConfig;

use crate::application::services::{OrchestratorSettings, SchedulerSettings};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backtest engine connection.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Job scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Job store.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Settings the orchestrator is built with.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            default_max_parallel: self.scheduler.default_max_parallel,
            engine_max_parallel: self.engine.max_parallel,
            scheduler: SchedulerSettings::from(&self.scheduler),
        }
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset or empty
/// variables without a default become an empty string.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match cap.get(1).map(|m| std::env::var(m.as_str())) {
            Some(Ok(v)) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.engine.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "engine.base_url must not be empty".to_string(),
        ));
    }

    if config.engine.max_parallel == 0 {
        return Err(ConfigError::ValidationError(
            "engine.max_parallel must be at least 1".to_string(),
        ));
    }

    let retry = &config.engine.retry;
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(ConfigError::ValidationError(
            "engine.retry.jitter must be between 0.0 and 1.0".to_string(),
        ));
    }

    if retry.multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "engine.retry.multiplier must be at least 1.0".to_string(),
        ));
    }

    if retry.initial_backoff_ms > retry.max_backoff_ms {
        return Err(ConfigError::ValidationError(
            "engine.retry.initial_backoff_ms must not exceed max_backoff_ms".to_string(),
        ));
    }

    if config.scheduler.default_max_parallel == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.default_max_parallel must be at least 1".to_string(),
        ));
    }

    if config.scheduler.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.poll_interval_ms must be positive".to_string(),
        ));
    }

    if config.scheduler.max_poll_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_poll_attempts must be at least 1".to_string(),
        ));
    }

    if config.persistence.backend == StoreBackend::Sqlite
        && config.persistence.db_path.trim().is_empty()
    {
        return Err(ConfigError::ValidationError(
            "persistence.db_path is required for the sqlite backend".to_string(),
        ));
    }

    let metrics = &config.observability.metrics;
    if metrics.enabled && metrics.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::ValidationError(format!(
            "observability.metrics.listen_addr is not a socket address: {}",
            metrics.listen_addr
        )));
    }

    Ok(())
}
