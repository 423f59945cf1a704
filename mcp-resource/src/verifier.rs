//! Token verification by RFC 7662 introspection
//!
//! The resource server never interprets access tokens itself. Every bearer
//! token is sent to the authorization server's introspection endpoint and
//! the answer becomes an [`AccessVerdict`]. Anything other than a well-formed
//! `active: true` response is a rejection: transport failures, timeouts and
//! malformed bodies all fail closed.

use crate::config::{ConfigError, ResourceServerSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcp_simple_auth_logging::{LogSanitizer, redact_token};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// What a valid token grants
#[derive(Debug, Clone, PartialEq)]
pub struct AccessVerdict {
    pub client_id: String,
    pub scopes: Vec<String>,
    /// RFC 8707 audience the token was issued for
    pub resource: Option<String>,
    pub subject: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessVerdict {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("Introspection endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Introspection request timed out")]
    Timeout,

    #[error("Invalid introspection response: {0}")]
    InvalidResponse(String),

    #[error("Token is not active")]
    Inactive,

    #[error("Token audience {actual:?} does not match resource {expected}")]
    ResourceMismatch {
        expected: String,
        actual: Vec<String>,
    },
}

impl From<reqwest::Error> for IntrospectionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            IntrospectionError::Timeout
        } else if e.is_decode() {
            IntrospectionError::InvalidResponse(e.to_string())
        } else {
            IntrospectionError::Unreachable(e.to_string())
        }
    }
}

/// Validates bearer tokens for the protected endpoints
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<AccessVerdict, IntrospectionError>;
}

/// RFC 7662 `aud` may be a single string or an array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionClaims {
    active: bool,
    client_id: Option<String>,
    scope: Option<String>,
    exp: Option<i64>,
    aud: Option<Audience>,
    sub: Option<String>,
    username: Option<String>,
}

/// Verifier backed by a remote introspection endpoint
#[derive(Debug, Clone)]
pub struct IntrospectionVerifier {
    client: reqwest::Client,
    introspection_endpoint: String,
    server_url: String,
    validate_resource: bool,
}

impl IntrospectionVerifier {
    pub fn new(
        introspection_endpoint: impl Into<String>,
        server_url: impl Into<String>,
        validate_resource: bool,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            introspection_endpoint: introspection_endpoint.into(),
            server_url: server_url.into(),
            validate_resource,
        })
    }

    pub fn from_settings(settings: &ResourceServerSettings) -> Result<Self, ConfigError> {
        Self::new(
            settings.introspection_url(),
            settings.server_url.clone(),
            settings.oauth_strict,
            settings.introspection_timeout(),
        )
    }

    async fn introspect(&self, token: &str) -> Result<IntrospectionClaims, IntrospectionError> {
        let response = self
            .client
            .post(&self.introspection_endpoint)
            .form(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // The body may echo the request, token included
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body = %LogSanitizer::new().sanitize(&body), "Introspection rejected");
            return Err(IntrospectionError::InvalidResponse(format!(
                "introspection endpoint returned {status}"
            )));
        }

        Ok(response.json::<IntrospectionClaims>().await?)
    }

    fn check_audience(&self, audience: &[String]) -> Result<(), IntrospectionError> {
        let expected = normalize_resource(&self.server_url);
        if audience.iter().any(|aud| normalize_resource(aud) == expected) {
            return Ok(());
        }
        Err(IntrospectionError::ResourceMismatch {
            expected: self.server_url.clone(),
            actual: audience.to_vec(),
        })
    }
}

#[async_trait]
impl TokenVerifier for IntrospectionVerifier {
    async fn verify_token(&self, token: &str) -> Result<AccessVerdict, IntrospectionError> {
        let claims = self.introspect(token).await.inspect_err(|e| {
            warn!(
                error = %e,
                endpoint = %self.introspection_endpoint,
                "Token introspection failed"
            );
        })?;

        if !claims.active {
            debug!(token = %redact_token(token), "Token is not active");
            return Err(IntrospectionError::Inactive);
        }

        let audience = claims.aud.map(Audience::into_vec).unwrap_or_default();
        if self.validate_resource {
            self.check_audience(&audience).inspect_err(|e| {
                warn!(error = %e, "Rejected token issued for another resource");
            })?;
        }

        Ok(AccessVerdict {
            client_id: claims.client_id.unwrap_or_else(|| "unknown".to_string()),
            scopes: claims
                .scope
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            resource: audience.into_iter().next(),
            subject: claims.sub.or(claims.username),
            expires_at: claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
        })
    }
}

/// Resource identifiers compare equal regardless of a trailing slash
fn normalize_resource(resource: &str) -> &str {
    resource.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(strict: bool) -> IntrospectionVerifier {
        IntrospectionVerifier::new(
            "http://127.0.0.1:1/introspect",
            "https://rs.example.com/mcp",
            strict,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_audience_match_ignores_trailing_slash() {
        let verifier = verifier(true);
        assert!(
            verifier
                .check_audience(&["https://rs.example.com/mcp/".to_string()])
                .is_ok()
        );
    }

    #[test]
    fn test_audience_mismatch() {
        let verifier = verifier(true);
        let result = verifier.check_audience(&["https://other.example.com/mcp".to_string()]);
        assert!(matches!(
            result,
            Err(IntrospectionError::ResourceMismatch { .. })
        ));
        assert!(matches!(
            verifier.check_audience(&[]),
            Err(IntrospectionError::ResourceMismatch { .. })
        ));
    }

    #[test]
    fn test_audience_accepts_string_or_array() {
        let one: IntrospectionClaims =
            serde_json::from_str(r#"{"active": true, "aud": "https://a"}"#).unwrap();
        assert_eq!(one.aud.unwrap().into_vec(), vec!["https://a"]);

        let many: IntrospectionClaims =
            serde_json::from_str(r#"{"active": true, "aud": ["https://a", "https://b"]}"#)
                .unwrap();
        assert_eq!(many.aud.unwrap().into_vec().len(), 2);
    }

    #[test]
    fn test_verdict_scope_check() {
        let verdict = AccessVerdict {
            client_id: "c1".to_string(),
            scopes: vec!["user".to_string()],
            resource: None,
            subject: None,
            expires_at: None,
        };
        assert!(verdict.has_scope("user"));
        assert!(!verdict.has_scope("admin"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_closed() {
        let result = verifier(false).verify_token("mcp_token").await;
        assert!(matches!(
            result,
            Err(IntrospectionError::Unreachable(_) | IntrospectionError::Timeout)
        ));
    }
}
