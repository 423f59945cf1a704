//! Discovery documents served by the resource server
//!
//! RFC 9728 protected resource metadata, plus proxies for the authorization
//! server's RFC 8414 and OpenID discovery documents so clients that only
//! know the resource server's origin can still find the endpoints.

use crate::ResourceServerState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

/// RFC 9728 Section 2
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
    pub resource_documentation: String,
}

/// GET /.well-known/oauth-protected-resource and
/// /.well-known/oauth-protected-resource/mcp
pub async fn protected_resource_metadata(
    State(state): State<ResourceServerState>,
) -> Json<ProtectedResourceMetadata> {
    let settings = &state.settings;
    Json(ProtectedResourceMetadata {
        resource: settings.server_url.clone(),
        authorization_servers: vec![settings.auth_server_url.clone()],
        scopes_supported: vec![settings.mcp_scope.clone()],
        bearer_methods_supported: vec!["header".to_string()],
        resource_documentation: "https://modelcontextprotocol.io".to_string(),
    })
}

/// GET /.well-known/oauth-authorization-server
pub async fn authorization_server_metadata(
    State(state): State<ResourceServerState>,
) -> Json<Value> {
    let base = state.settings.auth_server_base();
    let fallback = json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "introspection_endpoint": format!("{base}/introspect"),
        "scopes_supported": [state.settings.mcp_scope],
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
    });

    Json(
        fetch_document(&state, "/.well-known/oauth-authorization-server")
            .await
            .unwrap_or(fallback),
    )
}

/// GET /.well-known/openid-configuration
pub async fn openid_configuration(State(state): State<ResourceServerState>) -> Json<Value> {
    let base = state.settings.auth_server_base();
    let fallback = json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "scopes_supported": [state.settings.mcp_scope, "openid"],
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
    });

    Json(
        fetch_document(&state, "/.well-known/openid-configuration")
            .await
            .unwrap_or(fallback),
    )
}

/// Fetch a JSON document from the authorization server, `None` on any failure
async fn fetch_document(state: &ResourceServerState, path: &str) -> Option<Value> {
    let url = format!("{}{}", state.settings.auth_server_base(), path);

    let response = match state.http.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(%url, error = %e, "Failed to fetch authorization server metadata");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(%url, status = %response.status(), "Authorization server metadata unavailable");
        return None;
    }

    response
        .json::<Value>()
        .await
        .inspect_err(|e| warn!(%url, error = %e, "Malformed authorization server metadata"))
        .ok()
}
