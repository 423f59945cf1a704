//! Resource server configuration

use mcp_simple_auth_logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Resource server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceServerSettings {
    pub host: String,
    pub port: u16,
    /// Public URL of the MCP endpoint; this is the resource identifier
    pub server_url: String,
    pub auth_server_url: String,
    /// Defaults to `<auth_server_url>/introspect`
    pub introspection_endpoint: Option<String>,
    /// Scope every request must carry
    pub mcp_scope: String,
    /// Reject tokens whose audience is not `server_url` (RFC 8707)
    pub oauth_strict: bool,
    /// Upper bound on each call to the authorization server
    pub introspection_timeout_secs: u64,
    /// Built HTML of the tool output widget
    pub widget_path: PathBuf,
    pub logging: LoggingConfig,
}

impl Default for ResourceServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8001,
            server_url: "http://localhost:8001/mcp".to_string(),
            auth_server_url: "http://localhost:9000".to_string(),
            introspection_endpoint: None,
            mcp_scope: "user".to_string(),
            oauth_strict: false,
            introspection_timeout_secs: 10,
            widget_path: PathBuf::from("widget/assets/tool-output.html"),
            logging: LoggingConfig::default(),
        }
    }
}

impl ResourceServerSettings {
    /// Load settings from a TOML file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url("server_url", &self.server_url)?;
        parse_url("auth_server_url", &self.auth_server_url)?;

        let introspection = parse_url("introspection_endpoint", &self.introspection_url())?;
        if !is_https_or_loopback(&introspection) {
            return Err(ConfigError::Invalid(format!(
                "introspection endpoint {introspection} must use HTTPS unless it is on localhost"
            )));
        }

        if self.introspection_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "introspection_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn auth_server_base(&self) -> &str {
        self.auth_server_url.trim_end_matches('/')
    }

    pub fn introspection_url(&self) -> String {
        self.introspection_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/introspect", self.auth_server_base()))
    }

    pub fn introspection_timeout(&self) -> Duration {
        Duration::from_secs(self.introspection_timeout_secs)
    }

    /// RFC 9728 Section 3.1: the well-known suffix goes between the host and
    /// the path of the resource identifier
    pub fn resource_metadata_url(&self) -> String {
        const WELL_KNOWN: &str = "/.well-known/oauth-protected-resource";

        match Url::parse(&self.server_url) {
            Ok(url) => {
                let origin = url.origin().ascii_serialization();
                let path = url.path().trim_end_matches('/');
                format!("{origin}{WELL_KNOWN}{path}")
            }
            Err(_) => format!("{}{WELL_KNOWN}", self.server_url.trim_end_matches('/')),
        }
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid(format!("{name} '{value}': {e}")))
}

fn is_https_or_loopback(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => matches!(
            url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        ),
        _ => false,
    }
}
