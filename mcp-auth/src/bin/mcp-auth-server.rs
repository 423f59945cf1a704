//! OAuth 2.1 authorization server for MCP resource servers

use anyhow::Context;
use clap::Parser;
use mcp_simple_auth_logging::LogFormat;
use mcp_simple_auth_server::{
    AuthServerSettings, StorageConfig,
    oauth::{
        AuthServerState, AuthorizationEngine, EngineConfig, FileOAuthStorage,
        InMemoryOAuthStorage, OAuthStorage, oauth_router, spawn_reaper,
    },
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mcp-auth-server")]
#[command(about = "OAuth 2.1 authorization server with PKCE and token introspection")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "MCP_AUTH_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long, env = "MCP_AUTH_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_AUTH_PORT")]
    port: Option<u16>,

    /// Public base URL; derived from host and port when omitted
    #[arg(long, env = "MCP_AUTH_SERVER_URL")]
    server_url: Option<String>,

    /// Persist OAuth state to this JSON file instead of memory
    #[arg(long, env = "MCP_AUTH_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    /// Seconds between expired-state sweeps (0 disables)
    #[arg(long, env = "MCP_AUTH_CLEANUP_INTERVAL")]
    cleanup_interval: Option<u64>,

    /// Log output format: json, pretty or compact
    #[arg(long, env = "MCP_AUTH_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn into_settings(self) -> anyhow::Result<AuthServerSettings> {
        let mut settings = match &self.config {
            Some(path) => AuthServerSettings::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AuthServerSettings::default(),
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
                settings.server_url = format!("http://{}:{}", settings.host, settings.port);
            }
            None => {}
        }
        if let Some(path) = self.storage_path {
            settings.storage = StorageConfig::File { path };
        }
        if let Some(secs) = self.cleanup_interval {
            settings.cleanup_interval_secs = secs;
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

    let storage: Arc<dyn OAuthStorage> = match &settings.storage {
        StorageConfig::File { path } => Arc::new(FileOAuthStorage::open(path).await?),
        StorageConfig::Memory => Arc::new(InMemoryOAuthStorage::new()),
    };
    let engine = Arc::new(AuthorizationEngine::new(
        storage,
        EngineConfig::from(&settings),
    ));

    let reaper = (settings.cleanup_interval_secs > 0).then(|| {
        spawn_reaper(
            engine.clone(),
            Duration::from_secs(settings.cleanup_interval_secs),
        )
    });

    let addr = format!("{}:{}", settings.host, settings.port);
    let server_url = settings.server_url.clone();

    let app = oauth_router()
        .with_state(AuthServerState::new(engine, settings))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, %server_url, "Authorization server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    info!("Authorization server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
