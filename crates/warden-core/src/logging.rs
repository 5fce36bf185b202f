//! Logging configuration and subscriber setup

use crate::error::{SandboxError, WardenResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty, compact)
    pub format: LogFormat,
    /// Colored output for human-readable formats
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(SandboxError::invalid_config(format!(
                "unknown log level '{}', expected one of {}",
                self.level,
                LEVELS.join(", ")
            )))
        }
    }

    /// `RUST_LOG` wins over the configured level when set
    fn env_filter(&self) -> WardenResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(self.level.to_ascii_lowercase())
                .map_err(|e| SandboxError::invalid_config(format!("invalid log level: {}", e))),
        }
    }
}

/// Install the global tracing subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> WardenResult<()> {
    config.validate()?;
    let filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().with_ansi(config.ansi).try_init(),
        LogFormat::Compact => builder.compact().with_ansi(config.ansi).try_init(),
        LogFormat::Json => builder.json().with_ansi(false).try_init(),
    };

    result.map_err(|e| SandboxError::internal(format!("failed to install subscriber: {}", e)))
}
