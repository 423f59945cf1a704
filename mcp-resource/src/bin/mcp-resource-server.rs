//! MCP resource server validating tokens by introspection

use anyhow::Context;
use clap::Parser;
use mcp_simple_auth_logging::LogFormat;
use mcp_simple_auth_resource::{
    IntrospectionVerifier, ResourceServerSettings, ResourceServerState, resource_router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mcp-resource-server")]
#[command(about = "MCP resource server that validates bearer tokens by introspection")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "MCP_RESOURCE_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long, env = "MCP_RESOURCE_HOST")]
    host: Option<String>,

    /// Port to listen on; container platforms set PORT
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Authorization server base URL
    #[arg(long, env = "MCP_RESOURCE_AUTH_SERVER_URL")]
    auth_server: Option<String>,

    /// Public URL of the MCP endpoint; derived from host and port when omitted
    #[arg(long, env = "MCP_RESOURCE_SERVER_URL")]
    server_url: Option<String>,

    /// Enable RFC 8707 resource validation
    #[arg(long, env = "MCP_RESOURCE_OAUTH_STRICT")]
    oauth_strict: bool,

    /// Built HTML of the tool output widget
    #[arg(long, env = "MCP_RESOURCE_WIDGET_PATH")]
    widget_path: Option<PathBuf>,

    /// Log output format: json, pretty or compact
    #[arg(long, env = "MCP_RESOURCE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn into_settings(self) -> anyhow::Result<ResourceServerSettings> {
        let mut settings = match &self.config {
            Some(path) => ResourceServerSettings::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ResourceServerSettings::default(),
        };

        let address_overridden = self.host.is_some() || self.port.is_some();
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        match self.server_url {
            Some(url) => settings.server_url = url,
            None if address_overridden => {
                settings.server_url = format!("http://{}:{}/mcp", settings.host, settings.port);
            }
            None => {}
        }
        if let Some(auth_server) = self.auth_server {
            settings.auth_server_url = auth_server;
            // The introspection endpoint follows the authorization server
            settings.introspection_endpoint = None;
        }
        if self.oauth_strict {
            settings.oauth_strict = true;
        }
        if let Some(path) = self.widget_path {
            settings.widget_path = path;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }

        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().into_settings()?;
    settings.logging.initialize()?;
    settings.validate()?;

    let verifier = Arc::new(IntrospectionVerifier::from_settings(&settings)?);
    let addr = format!("{}:{}", settings.host, settings.port);
    info!(
        server_url = %settings.server_url,
        auth_server = %settings.auth_server_url,
        oauth_strict = settings.oauth_strict,
        widget = %settings.widget_path.display(),
        "MCP resource server configured"
    );

    let app = resource_router(ResourceServerState::new(settings)?, verifier)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Resource server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Resource server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
