//! Tracing Setup
//!
//! Initializes the `tracing-subscriber` fmt layer for the binary.
//!
//! # Configuration
//!
//! - `RUST_LOG`: Full filter directives. Overrides `observability.logging.level`.
//! - `observability.logging.level`: Level for this crate when `RUST_LOG` is unset.
//! - `observability.logging.format`: `pretty`, `json` or `compact`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strategy_optimizer::telemetry::init_tracing;
//!
//! init_tracing(&config.observability.logging)?;
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log level '{level}': {message}")]
    InvalidLevel {
        /// Configured level.
        level: String,
        /// Parser message.
        message: String,
    },
    /// A global subscriber is already installed.
    #[error("failed to initialize tracing subscriber: {0}")]
    Subscriber(String),
}

/// Filter directive used when `RUST_LOG` is unset.
#[must_use]
pub fn default_directive(level: &str) -> String {
    format!("strategy_optimizer={}", level.trim().to_ascii_lowercase())
}

/// Build the env filter: `RUST_LOG` if set, else the configured crate level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directive(&config.level)).map_err(|e| {
        TelemetryError::InvalidLevel {
            level: config.level.clone(),
            message: e.to_string(),
        }
    })
}

/// Install the global subscriber.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
    };

    installed.map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_targets_this_crate() {
        assert_eq!(default_directive(" DEBUG "), "strategy_optimizer=debug");
    }

    #[test]
    fn garbage_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "very loud".to_string(),
            format: LogFormat::Compact,
        };
        assert!(matches!(
            env_filter(&config),
            Err(TelemetryError::InvalidLevel { .. })
        ));
    }
}
