//! RFC 7591: Dynamic Client Registration

use crate::oauth::{
    ApiError, AuthServerState,
    engine::random_hex,
    models::{ClientRegistrationRequest, ClientRegistrationResponse, OAuthClient, OAuthError},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;

const SUPPORTED_AUTH_METHODS: &[&str] = &["client_secret_post", "none"];

/// POST /register
///
/// # Request
/// ```json
/// {
///   "client_name": "My MCP Client",
///   "redirect_uris": ["https://example.com/callback"],
///   "grant_types": ["authorization_code"],
///   "response_types": ["code"]
/// }
/// ```
///
/// Responds `201 Created` with the generated `client_id` and, unless
/// `token_endpoint_auth_method` is `none`, a `client_secret`.
pub async fn register_client(
    State(state): State<AuthServerState>,
    Json(request): Json<ClientRegistrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.redirect_uris.is_empty() {
        return Err(invalid_metadata("At least one redirect_uri is required"));
    }

    for uri in &request.redirect_uris {
        if !is_valid_redirect_uri(uri) {
            return Err(ApiError::bad_request(OAuthError::invalid_redirect_uri(
                format!("Invalid redirect_uri: {uri}. Must be HTTPS or http://localhost"),
            )));
        }
    }

    let grant_types = if request.grant_types.is_empty() {
        vec!["authorization_code".to_string()]
    } else {
        request.grant_types
    };
    if let Some(grant_type) = grant_types.iter().find(|g| *g != "authorization_code") {
        return Err(invalid_metadata(format!(
            "Unsupported grant_type: {grant_type}. Only authorization_code is supported"
        )));
    }

    let response_types = if request.response_types.is_empty() {
        vec!["code".to_string()]
    } else {
        request.response_types
    };
    if let Some(response_type) = response_types.iter().find(|r| *r != "code") {
        return Err(invalid_metadata(format!(
            "Unsupported response_type: {response_type}. Only 'code' is supported"
        )));
    }

    let auth_method = request
        .token_endpoint_auth_method
        .unwrap_or_else(|| "client_secret_post".to_string());
    if !SUPPORTED_AUTH_METHODS.contains(&auth_method.as_str()) {
        return Err(invalid_metadata(format!(
            "Unsupported token_endpoint_auth_method: {auth_method}"
        )));
    }

    if let Some(scope) = &request.scope {
        if scope.split_whitespace().any(|s| s != state.settings.mcp_scope) {
            return Err(invalid_metadata(format!(
                "Unsupported scope: {scope}. Supported: {}",
                state.settings.mcp_scope
            )));
        }
    }

    // Public clients authenticate with PKCE alone
    let client_secret = (auth_method != "none").then(|| random_hex(32));

    let client = OAuthClient {
        client_id: random_hex(16),
        client_secret,
        client_name: request.client_name,
        redirect_uris: request.redirect_uris,
        grant_types,
        response_types,
        scope: request.scope,
        token_endpoint_auth_method: auth_method,
        client_id_issued_at: Utc::now(),
    };

    state.engine.register_client(&client).await?;

    Ok((
        StatusCode::CREATED,
        Json(ClientRegistrationResponse::from(client)),
    ))
}

fn invalid_metadata(description: impl Into<String>) -> ApiError {
    ApiError::bad_request(OAuthError::invalid_client_metadata(description))
}

/// Redirect URIs must be HTTPS, or plain HTTP on a loopback host.
/// Fragments are not allowed (RFC 6749 Section 3.1.2).
pub(crate) fn is_valid_redirect_uri(uri: &str) -> bool {
    let Ok(url) = url::Url::parse(uri) else {
        return false;
    };
    if url.fragment().is_some() {
        return false;
    }

    match url.scheme() {
        "https" => url.host().is_some(),
        "http" => matches!(
            url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        ),
        _ => false,
    }
}
