//! RFC 8414: Authorization Server Metadata

use crate::config::AuthServerSettings;
use crate::oauth::AuthServerState;
use crate::oauth::pkce::S256;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    pub fn from_settings(settings: &AuthServerSettings) -> Self {
        Self {
            issuer: settings.issuer().to_string(),
            authorization_endpoint: settings.endpoint("/authorize"),
            token_endpoint: settings.endpoint("/token"),
            registration_endpoint: settings.endpoint("/register"),
            introspection_endpoint: settings.endpoint("/introspect"),
            revocation_endpoint: settings.endpoint("/revoke"),
            scopes_supported: vec![settings.mcp_scope.clone()],
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec!["authorization_code".to_string()],
            code_challenge_methods_supported: vec![S256.to_string()],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_post".to_string(),
                "none".to_string(),
            ],
        }
    }
}

/// GET /.well-known/oauth-authorization-server
pub async fn authorization_server_metadata(
    State(state): State<AuthServerState>,
) -> Json<AuthorizationServerMetadata> {
    Json(AuthorizationServerMetadata::from_settings(&state.settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_derive_from_server_url() {
        let settings = AuthServerSettings {
            server_url: "https://auth.example.com/".to_string(),
            ..Default::default()
        };
        let metadata = AuthorizationServerMetadata::from_settings(&settings);

        assert_eq!(metadata.issuer, "https://auth.example.com");
        assert_eq!(metadata.token_endpoint, "https://auth.example.com/token");
        assert_eq!(
            metadata.introspection_endpoint,
            "https://auth.example.com/introspect"
        );
        assert_eq!(metadata.code_challenge_methods_supported, vec!["S256"]);
        assert_eq!(metadata.scopes_supported, vec!["user"]);
    }
}
