//! Authorization server configuration

use mcp_simple_auth_logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthServerSettings {
    pub host: String,
    pub port: u16,
    /// Public base URL; the issuer and all endpoint URLs derive from it
    pub server_url: String,
    /// The single demo identity accepted at the login callback
    pub demo_username: String,
    pub demo_password: String,
    /// The scope granted to every issued code and token
    pub mcp_scope: String,
    /// Storage backend configuration
    pub storage: StorageConfig,
    /// Interval of the background expiry sweep; 0 disables it
    pub cleanup_interval_secs: u64,
    pub auth_code_ttl_secs: u64,
    pub access_token_ttl_secs: u64,
    pub flow_state_ttl_secs: u64,
    pub logging: LoggingConfig,
}

/// Storage configuration for OAuth state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// JSON snapshot file, survives restarts
    File {
        /// Path to the snapshot file
        path: PathBuf,
    },
    /// Memory-only storage
    Memory,
}

impl Default for AuthServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9000,
            server_url: "http://localhost:9000".to_string(),
            demo_username: "demo".to_string(),
            demo_password: "demo123".to_string(),
            mcp_scope: "user".to_string(),
            storage: StorageConfig::Memory,
            cleanup_interval_secs: 0,
            auth_code_ttl_secs: 300,
            access_token_ttl_secs: 3600,
            flow_state_ttl_secs: 600,
            logging: LoggingConfig::default(),
        }
    }
}

impl AuthServerSettings {
    /// Load settings from a TOML file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&raw)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.server_url)
            .map_err(|e| ConfigError::Invalid(format!("server_url '{}': {e}", self.server_url)))?;

        if self.demo_username.is_empty() || self.demo_password.is_empty() {
            return Err(ConfigError::Invalid(
                "demo credentials must not be empty".to_string(),
            ));
        }
        if self.mcp_scope.trim().is_empty() || self.mcp_scope.contains(' ') {
            return Err(ConfigError::Invalid(
                "mcp_scope must be a single scope token".to_string(),
            ));
        }
        if self.auth_code_ttl_secs == 0
            || self.access_token_ttl_secs == 0
            || self.flow_state_ttl_secs == 0
        {
            return Err(ConfigError::Invalid("TTLs must be positive".to_string()));
        }
        Ok(())
    }

    /// Issuer identifier, without trailing slash
    pub fn issuer(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// Absolute URL of an endpoint path on this server
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer(), path)
    }

    pub fn login_url(&self) -> String {
        self.endpoint("/login")
    }
}
