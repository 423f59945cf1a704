//! # MCP Simple Auth: Authorization Server
//!
//! OAuth 2.1 authorization server for MCP deployments whose resource servers
//! validate opaque bearer tokens through remote introspection.
//!
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::new_without_default)]
//! ## Quick Start
//!
//! ```rust,ignore
//! use mcp_simple_auth_server::{AuthServerSettings, oauth::{AuthServerState, oauth_router}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = AuthServerSettings::default();
//!     let app = oauth_router().with_state(AuthServerState::new_in_memory(settings));
//!
//!     let listener = tokio::net::TcpListener::bind("localhost:9000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Flow
//!
//! 1. `GET /authorize` validates the client and PKCE parameters, records a
//!    flow state and redirects to the demo login page.
//! 2. `POST /login/callback` checks the demo credentials and redirects to the
//!    client with a single-use authorization code.
//! 3. `POST /token` verifies PKCE and exchanges the code for an opaque
//!    access token.
//! 4. Resource servers call `POST /introspect` for every protected request.
//!
//! ## Storage
//!
//! All flow state lives behind the [`oauth::OAuthStorage`] trait. The engine
//! itself is stateless, so several server instances can share one store.
//! [`oauth::InMemoryOAuthStorage`] and [`oauth::FileOAuthStorage`] are
//! provided.

pub mod config;
pub mod oauth;

pub use config::{AuthServerSettings, ConfigError, StorageConfig};
pub use oauth::{
    AuthServerState, AuthorizationEngine, CleanupReport, EngineConfig, FlowError, oauth_router,
    spawn_reaper,
};
