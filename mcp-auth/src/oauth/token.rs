//! OAuth 2.1 Token Endpoint
//!
//! Only the `authorization_code` grant is supported. Tokens are opaque
//! strings; resource servers validate them by introspection.

use crate::oauth::{
    ApiError, AuthServerState,
    models::{OAuthClient, OAuthError, TokenRequest},
    pkce::{validate_code_verifier, verify_pkce},
};
use axum::{
    Form, Json,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

/// POST /token
///
/// # Authorization Code Grant
/// ```text
/// grant_type=authorization_code
/// &code=mcp_...
/// &redirect_uri=https://example.com/callback
/// &code_verifier=...
/// &client_id=...
/// &client_secret=...
/// ```
///
/// # Response
/// ```json
/// {
///   "access_token": "mcp_...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "user"
/// }
/// ```
pub async fn token_endpoint(
    State(state): State<AuthServerState>,
    Form(request): Form<TokenRequest>,
) -> Response {
    let mut response = match request.grant_type.as_str() {
        "authorization_code" => handle_authorization_code_grant(&state, request).await,
        _ => Err(ApiError::bad_request(OAuthError::unsupported_grant_type(
            format!("grant_type '{}' not supported", request.grant_type),
        ))),
    }
    .unwrap_or_else(IntoResponse::into_response);

    // RFC 6749 Section 5.1
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

async fn handle_authorization_code_grant(
    state: &AuthServerState,
    request: TokenRequest,
) -> Result<Response, ApiError> {
    let client = authenticate_client(state, &request).await?;

    let code = request
        .code
        .ok_or_else(|| ApiError::bad_request(OAuthError::invalid_request("code is required")))?;
    let code_verifier = request.code_verifier.ok_or_else(|| {
        ApiError::bad_request(OAuthError::invalid_request("code_verifier is required"))
    })?;
    if !validate_code_verifier(&code_verifier) {
        return Err(ApiError::bad_request(OAuthError::invalid_request(
            "Invalid code_verifier format",
        )));
    }

    let auth_code = state
        .engine
        .load_authorization_code(&client, &code)
        .await?
        .ok_or_else(|| {
            ApiError::bad_request(OAuthError::invalid_grant(
                "Authorization code is invalid or expired",
            ))
        })?;

    // RFC 6749 Section 4.1.3: must repeat the redirect_uri sent to /authorize
    if auth_code.redirect_uri_provided_explicitly
        && request.redirect_uri.as_deref() != Some(auth_code.redirect_uri.as_str())
    {
        return Err(ApiError::bad_request(OAuthError::invalid_grant(
            "redirect_uri does not match the authorization request",
        )));
    }

    if let Some(resource) = request.resource.as_deref() {
        if auth_code.resource.as_deref() != Some(resource) {
            return Err(ApiError::bad_request(OAuthError::invalid_target(
                "resource does not match the authorization request",
            )));
        }
    }

    if !verify_pkce(&code_verifier, &auth_code.code_challenge) {
        warn!(client_id = %client.client_id, "PKCE verification failed");
        return Err(ApiError::bad_request(OAuthError::invalid_grant(
            "PKCE verification failed",
        )));
    }

    let token = state.engine.exchange_code_for_token(&client, &code).await?;
    Ok(Json(token).into_response())
}

/// `client_secret_post` authentication; public clients send no secret
async fn authenticate_client(
    state: &AuthServerState,
    request: &TokenRequest,
) -> Result<OAuthClient, ApiError> {
    let client = state
        .engine
        .get_client(&request.client_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized_client("Unknown client"))?;

    if let Some(expected) = client.client_secret.as_deref() {
        let provided = request.client_secret.as_deref().unwrap_or_default();
        if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            warn!(client_id = %client.client_id, "Client authentication failed");
            return Err(ApiError::unauthorized_client("Client authentication failed"));
        }
    }

    Ok(client)
}
