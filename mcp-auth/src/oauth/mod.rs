//! OAuth 2.1 Authorization Server
//!
//! Authorization code flow with mandatory PKCE (S256), following:
//! - OAuth 2.1 (draft-ietf-oauth-v2-1-13)
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7662: Token Introspection
//! - RFC 7009: Token Revocation
//! - RFC 8414: Authorization Server Metadata
//! - RFC 8707: Resource Indicators
//!
//! Access tokens are opaque; resource servers validate them through the
//! introspection endpoint.

pub mod authorize;
pub mod engine;
pub mod file_storage;
pub mod introspect;
pub mod metadata;
pub mod models;
pub mod pkce;
pub mod reaper;
pub mod registration;
pub mod storage;
pub mod token;

pub use authorize::{authorize_get, authorize_post, login_callback, login_page};
pub use engine::{AuthorizationEngine, EngineConfig, FlowError};
pub use file_storage::FileOAuthStorage;
pub use introspect::{introspect_endpoint, revoke_endpoint};
pub use metadata::authorization_server_metadata;
pub use reaper::{CleanupReport, spawn_reaper};
pub use registration::register_client;
pub use storage::{InMemoryOAuthStorage, OAuthStorage, OAuthStorageError};
pub use token::token_endpoint;

use crate::config::AuthServerSettings;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use models::OAuthError;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared state of the authorization server routes
#[derive(Clone)]
pub struct AuthServerState {
    pub engine: Arc<AuthorizationEngine>,
    pub settings: Arc<AuthServerSettings>,
}

impl AuthServerState {
    pub fn new(engine: Arc<AuthorizationEngine>, settings: AuthServerSettings) -> Self {
        Self {
            engine,
            settings: Arc::new(settings),
        }
    }

    /// State over a fresh in-memory store
    pub fn new_in_memory(settings: AuthServerSettings) -> Self {
        let engine = AuthorizationEngine::new(
            Arc::new(InMemoryOAuthStorage::new()),
            EngineConfig::from(&settings),
        );
        Self::new(Arc::new(engine), settings)
    }
}

/// Error of an OAuth endpoint: either an engine failure or a protocol error
/// detected by the handler itself
#[derive(Debug)]
pub enum ApiError {
    Flow(FlowError),
    OAuth(StatusCode, OAuthError),
}

impl ApiError {
    pub fn bad_request(error: OAuthError) -> Self {
        ApiError::OAuth(StatusCode::BAD_REQUEST, error)
    }

    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        ApiError::OAuth(
            StatusCode::UNAUTHORIZED,
            OAuthError::invalid_client(description),
        )
    }
}

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        ApiError::Flow(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Flow(e) => e.into_response(),
            ApiError::OAuth(status, error) => (status, Json(error)).into_response(),
        }
    }
}

/// Create the authorization server router with all endpoints
pub fn oauth_router() -> Router<AuthServerState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // RFC 8414: Authorization Server Metadata
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        // RFC 7591: Dynamic Client Registration
        .route("/register", post(register_client))
        .route("/authorize", get(authorize_get).post(authorize_post))
        // Demo login surface
        .route("/login", get(login_page))
        .route("/login/callback", post(login_callback))
        .route("/token", post(token_endpoint))
        // RFC 7662 / RFC 7009
        .route("/introspect", post(introspect_endpoint))
        .route("/revoke", post(revoke_endpoint))
        .layer(cors)
}
