//! # MCP Simple Auth: Resource Server
//!
//! An MCP server that acts as an OAuth 2.1 resource server. It holds no
//! token state: every request's bearer token is validated by calling the
//! authorization server's RFC 7662 introspection endpoint, and any failure
//! to get a positive answer rejects the request.
//!
//! ```rust,ignore
//! use mcp_simple_auth_resource::{ResourceServerSettings, ResourceServerState, resource_router};
//! use mcp_simple_auth_resource::verifier::IntrospectionVerifier;
//! use std::sync::Arc;
//!
//! let settings = ResourceServerSettings::default();
//! let verifier = Arc::new(IntrospectionVerifier::from_settings(&settings)?);
//! let app = resource_router(ResourceServerState::new(settings)?, verifier);
//! ```

pub mod bearer;
pub mod config;
pub mod metadata;
pub mod tools;
pub mod verifier;
pub mod widget;

pub use bearer::{BearerAuth, BearerError, require_bearer};
pub use config::{ConfigError, ResourceServerSettings};
pub use verifier::{AccessVerdict, IntrospectionError, IntrospectionVerifier, TokenVerifier};
pub use widget::{Widget, WidgetError};

use axum::{
    Router,
    http::{Method, header},
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared state of the resource server routes
#[derive(Clone)]
pub struct ResourceServerState {
    pub settings: Arc<ResourceServerSettings>,
    /// Client for fetching the authorization server's discovery documents
    pub http: reqwest::Client,
    pub widget: Arc<Widget>,
}

impl ResourceServerState {
    pub fn new(settings: ResourceServerSettings) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(settings.introspection_timeout())
            .build()?;
        Ok(Self {
            widget: Arc::new(Widget::new(settings.widget_path.clone())),
            settings: Arc::new(settings),
            http,
        })
    }
}

/// Build the resource server: public discovery routes plus the protected
/// `/mcp` endpoint behind the bearer middleware
pub fn resource_router(state: ResourceServerState, verifier: Arc<dyn TokenVerifier>) -> Router {
    let auth = BearerAuth::new(
        verifier,
        vec![state.settings.mcp_scope.clone()],
        state.settings.resource_metadata_url(),
    );

    let protected = Router::new()
        .route("/mcp", post(tools::mcp_endpoint))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer));

    // Browser-based clients such as the MCP Inspector need to read the
    // WWW-Authenticate challenge
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::WWW_AUTHENTICATE, header::CONTENT_TYPE]);

    Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(metadata::protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(metadata::protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(metadata::authorization_server_metadata),
        )
        .route(
            "/.well-known/openid-configuration",
            get(metadata::openid_configuration),
        )
        .merge(protected)
        .with_state(state)
        .layer(cors)
}
