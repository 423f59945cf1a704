//! RFC 7662 Token Introspection and RFC 7009 Token Revocation

use crate::oauth::{ApiError, AuthServerState, models::TokenLookupRequest};
use axum::{Form, Json, extract::State, http::StatusCode, response::IntoResponse};
use mcp_simple_auth_logging::redact_token;
use tracing::debug;

/// POST /introspect
///
/// Unknown, expired and revoked tokens all answer `{"active": false}`.
pub async fn introspect_endpoint(
    State(state): State<AuthServerState>,
    Form(request): Form<TokenLookupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.engine.introspect(&request.token).await?;
    debug!(
        token = %redact_token(&request.token),
        active = response.active,
        "Token introspected"
    );
    Ok(Json(response))
}

/// POST /revoke
///
/// Always 200, whether or not the token existed (RFC 7009 Section 2.2).
pub async fn revoke_endpoint(
    State(state): State<AuthServerState>,
    Form(request): Form<TokenLookupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.revoke_token(&request.token).await?;
    Ok(StatusCode::OK)
}
