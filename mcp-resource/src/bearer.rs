//! RFC 6750: Bearer Token Authentication
//!
//! Middleware for the protected MCP routes. Tokens are checked through a
//! [`TokenVerifier`]; the resulting [`AccessVerdict`] is stored in the request
//! extensions for the handlers.

use crate::verifier::{AccessVerdict, IntrospectionError, TokenVerifier};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Bearer token error types per RFC 6750 Section 3.1
#[derive(Debug, Clone, PartialEq)]
pub enum BearerError {
    /// No token provided
    MissingToken,
    /// Malformed, unknown, expired or otherwise unusable token
    InvalidToken(String),
    /// Token doesn't have required scope
    InsufficientScope(String),
}

impl BearerError {
    /// Get RFC 6750 error code
    pub fn error_code(&self) -> &'static str {
        match self {
            BearerError::MissingToken | BearerError::InvalidToken(_) => "invalid_token",
            BearerError::InsufficientScope(_) => "insufficient_scope",
        }
    }

    pub fn error_description(&self) -> String {
        match self {
            BearerError::MissingToken => "Authentication required".to_string(),
            BearerError::InvalidToken(msg) => msg.clone(),
            BearerError::InsufficientScope(scope) => {
                format!("Insufficient scope, required: {}", scope)
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BearerError::InsufficientScope(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<IntrospectionError> for BearerError {
    fn from(e: IntrospectionError) -> Self {
        let description = match e {
            IntrospectionError::Inactive => "Token is not active",
            IntrospectionError::ResourceMismatch { .. } => "Token not intended for this resource",
            // Details of the authorization server's failure stay in the log
            IntrospectionError::Unreachable(_)
            | IntrospectionError::Timeout
            | IntrospectionError::InvalidResponse(_) => "Token could not be validated",
        };
        BearerError::InvalidToken(description.to_string())
    }
}

/// WWW-Authenticate header builder per RFC 6750 Section 3
///
/// # Example Response
/// ```text
/// HTTP/1.1 401 Unauthorized
/// WWW-Authenticate: Bearer realm="mcp", error="invalid_token", error_description="Token is not active", resource_metadata="https://rs.example.com/.well-known/oauth-protected-resource/mcp"
/// ```
pub struct WwwAuthenticate {
    realm: String,
    error: Option<BearerError>,
    resource_metadata_url: Option<String>,
}

impl WwwAuthenticate {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            error: None,
            resource_metadata_url: None,
        }
    }

    pub fn with_error(mut self, error: BearerError) -> Self {
        self.error = Some(error);
        self
    }

    /// Add RFC 9728 resource metadata URL
    pub fn with_resource_metadata(mut self, url: impl Into<String>) -> Self {
        self.resource_metadata_url = Some(url.into());
        self
    }

    pub fn to_header_value(&self) -> HeaderValue {
        let mut parts = vec![format!("Bearer realm=\"{}\"", self.realm)];

        // RFC 6750 Section 3.1: a request without credentials gets no error code
        let error = self
            .error
            .as_ref()
            .filter(|e| !matches!(e, BearerError::MissingToken));
        if let Some(error) = error {
            parts.push(format!("error=\"{}\"", error.error_code()));
            parts.push(format!(
                "error_description=\"{}\"",
                error.error_description()
            ));
            if let BearerError::InsufficientScope(scope) = error {
                parts.push(format!("scope=\"{}\"", scope));
            }
        }

        // RFC 9728 Section 5.1
        if let Some(ref url) = self.resource_metadata_url {
            parts.push(format!("resource_metadata=\"{}\"", url));
        }

        HeaderValue::from_str(&parts.join(", "))
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer realm=\"mcp\""))
    }

    /// 401 (or 403 for `insufficient_scope`) with the WWW-Authenticate header
    pub fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::WWW_AUTHENTICATE, self.to_header_value());

        let status = self
            .error
            .as_ref()
            .map_or(StatusCode::UNAUTHORIZED, BearerError::status_code);
        let body = match self.error {
            Some(ref error) => axum::Json(serde_json::json!({
                "error": error.error_code(),
                "error_description": error.error_description()
            }))
            .into_response(),
            None => ().into_response(),
        };

        (status, headers, body).into_response()
    }
}

/// Configuration of the bearer middleware
#[derive(Clone)]
pub struct BearerAuth {
    pub verifier: Arc<dyn TokenVerifier>,
    pub required_scopes: Vec<String>,
    pub realm: String,
    pub resource_metadata_url: String,
}

impl BearerAuth {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        required_scopes: Vec<String>,
        resource_metadata_url: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            required_scopes,
            realm: "mcp".to_string(),
            resource_metadata_url: resource_metadata_url.into(),
        }
    }

    pub fn reject(&self, error: BearerError) -> Response {
        WwwAuthenticate::new(&self.realm)
            .with_error(error)
            .with_resource_metadata(&self.resource_metadata_url)
            .into_response()
    }

    /// Authenticate a request, returning the verdict for its token
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AccessVerdict, BearerError> {
        let token = extract_bearer_token(headers)?;
        let verdict = self.verifier.verify_token(token).await?;

        if verdict.expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return Err(BearerError::InvalidToken("Token has expired".to_string()));
        }

        if let Some(missing) = self
            .required_scopes
            .iter()
            .find(|scope| !verdict.has_scope(scope))
        {
            return Err(BearerError::InsufficientScope(missing.clone()));
        }

        Ok(verdict)
    }
}

/// Token from `Authorization: Bearer <token>`; the scheme is case-insensitive
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, BearerError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(BearerError::MissingToken)?
        .to_str()
        .map_err(|_| BearerError::InvalidToken("Invalid authorization header".to_string()))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| BearerError::InvalidToken("Invalid authorization header format".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(BearerError::InvalidToken(
            "Invalid authorization header format".into(),
        ));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(BearerError::MissingToken);
    }
    Ok(token)
}

/// `axum::middleware::from_fn_with_state` entry point
pub async fn require_bearer(
    State(auth): State<BearerAuth>,
    mut request: Request,
    next: Next,
) -> Response {
    match auth.authenticate(request.headers()).await {
        Ok(verdict) => {
            debug!(client_id = %verdict.client_id, "Bearer token accepted");
            request.extensions_mut().insert(verdict);
            next.run(request).await
        }
        Err(error) => auth.reject(error),
    }
}
