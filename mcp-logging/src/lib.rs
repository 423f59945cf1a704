//! Logging setup for the MCP simple-auth servers
//!
//! Both the Authorization Server and the Resource Server initialise tracing
//! through [`LoggingConfig`], and route any secret-bearing value through
//! [`redact_token`] or [`LogSanitizer`] before it reaches a log line.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcp_simple_auth_logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new("info", LogFormat::Compact)
//!     .initialize()
//!     .expect("Failed to initialize logging");
//!
//! tracing::info!(port = 9000, "Authorization server starting");
//! ```

pub mod sanitization;

pub use sanitization::{LogSanitizer, SanitizationConfig, redact_token};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Result type for logging operations
pub type Result<T> = std::result::Result<T, LoggingError>;

/// Logging error types
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tracing error: {0}")]
    Tracing(String),
}

/// Output format of the `fmt` layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "pretty")]
    Pretty,
    #[default]
    #[serde(rename = "compact")]
    Compact,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(LoggingError::Config(format!(
                "Unknown log format '{other}', expected json, pretty or compact"
            ))),
        }
    }
}

/// Logging configuration shared by both server binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, format: LogFormat) -> Self {
        Self {
            level: level.into(),
            format,
        }
    }

    /// Install the global tracing subscriber.
    ///
    /// Fails if the filter directive is invalid or a global subscriber has
    /// already been installed.
    pub fn initialize(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| LoggingError::Config(format!("Invalid log level: {e}")))?;

        let registry = tracing_subscriber::registry().with(filter);
        let result = match self.format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        };

        result.map_err(|e| LoggingError::Tracing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("COMPACT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Compact);
    }
}
