//! OAuth 2.1 Data Models
//!
//! Documents persisted by the authorization server (clients, flow state,
//! authorization codes, access tokens, user data) and the wire types of the
//! HTTP endpoints. Expiry instants are stored as epoch seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document that stops being observable once its expiry instant is reached
pub trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;

    /// Live iff `now < expires_at`; a document expiring exactly `now` is gone.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }
}

/// OAuth client registered via dynamic client registration (RFC 7591)
///
/// Never expires; registration with an existing `client_id` overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    /// Absent for public clients (`token_endpoint_auth_method = "none"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub client_id_issued_at: DateTime<Utc>,
}

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string()]
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_auth_method() -> String {
    "client_secret_post".to_string()
}

impl OAuthClient {
    pub fn allows_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// The redirect URI to use when the authorization request omits one.
    ///
    /// Only defined when exactly one URI is registered.
    pub fn default_redirect_uri(&self) -> Option<&str> {
        match self.redirect_uris.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// Transient state of one in-progress authorization, keyed by `state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub redirect_uri_provided_explicitly: bool,
    /// PKCE S256 challenge
    pub code_challenge: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// RFC 8707: Resource indicator
    pub resource: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Expiring for FlowState {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Authorization code issued after a successful login callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub redirect_uri_provided_explicitly: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub resource: Option<String>,
    /// Username that authenticated at the callback
    pub subject: String,
}

impl Expiring for AuthorizationCode {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Opaque bearer access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub resource: Option<String>,
}

impl Expiring for AccessToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Authenticated user record, keyed by username and later by token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub username: String,
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub authenticated_at: DateTime<Utc>,
}

/// Client registration request (RFC 7591)
#[derive(Debug, Deserialize)]
pub struct ClientRegistrationRequest {
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub scope: Option<String>,
    pub token_endpoint_auth_method: Option<String>,
}

/// Client registration response (RFC 7591)
#[derive(Debug, Serialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub client_id_issued_at: i64,
    /// Unix timestamp, 0 = never expires
    pub client_secret_expires_at: i64,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub token_endpoint_auth_method: String,
}

impl From<OAuthClient> for ClientRegistrationResponse {
    fn from(client: OAuthClient) -> Self {
        Self {
            client_id: client.client_id,
            client_secret: client.client_secret,
            client_name: client.client_name,
            redirect_uris: client.redirect_uris,
            client_id_issued_at: client.client_id_issued_at.timestamp(),
            client_secret_expires_at: 0,
            grant_types: client.grant_types,
            response_types: client.response_types,
            scope: client.scope,
            token_endpoint_auth_method: client.token_endpoint_auth_method,
        }
    }
}

/// Authorization request parameters
#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    /// Must be "code"
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    /// PKCE S256 code challenge
    pub code_challenge: String,
    /// Must be "S256"
    #[serde(default = "default_challenge_method")]
    pub code_challenge_method: String,
    /// RFC 8707: Resource indicator
    pub resource: Option<String>,
    pub scope: Option<String>,
}

fn default_challenge_method() -> String {
    "S256".to_string()
}

/// Engine-level input of `authorize`, after HTTP validation
#[derive(Debug, Clone)]
pub struct AuthorizationParams {
    pub state: Option<String>,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub redirect_uri_provided_explicitly: bool,
    pub resource: Option<String>,
}

/// Demo login form submission
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub state: String,
}

/// Token request parameters
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Only "authorization_code"
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    /// PKCE S256 code verifier
    pub code_verifier: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// RFC 8707: Resource indicator
    pub resource: Option<String>,
}

/// Token response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Seconds until expiration
    pub expires_in: i64,
    /// Space-separated scopes
    pub scope: String,
}

/// Token introspection / revocation request (RFC 7662, RFC 7009)
#[derive(Debug, Deserialize)]
pub struct TokenLookupRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
}

/// Token introspection response (RFC 7662)
///
/// Inactive tokens serialize as `{"active": false}` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// RFC 8707 resource the token was issued for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Error response (RFC 6749 Section 5.2)
#[derive(Debug, Serialize)]
pub struct OAuthError {
    pub error: String,
    pub error_description: Option<String>,
}

impl OAuthError {
    fn new(error: &str, description: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new("invalid_client", description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description)
    }

    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::new("unsupported_grant_type", description)
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new("invalid_scope", description)
    }

    /// RFC 8707 Section 2
    pub fn invalid_target(description: impl Into<String>) -> Self {
        Self::new("invalid_target", description)
    }

    pub fn unsupported_response_type(description: impl Into<String>) -> Self {
        Self::new("unsupported_response_type", description)
    }

    /// RFC 7591 Section 3.2.2
    pub fn invalid_redirect_uri(description: impl Into<String>) -> Self {
        Self::new("invalid_redirect_uri", description)
    }

    /// RFC 7591 Section 3.2.2
    pub fn invalid_client_metadata(description: impl Into<String>) -> Self {
        Self::new("invalid_client_metadata", description)
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new("access_denied", description)
    }

    pub fn temporarily_unavailable(description: impl Into<String>) -> Self {
        Self::new("temporarily_unavailable", description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let token = AccessToken {
            token: "mcp_abc".to_string(),
            client_id: "c1".to_string(),
            scopes: vec!["user".to_string()],
            issued_at: now - Duration::seconds(3600),
            expires_at: now,
            resource: None,
        };

        assert!(token.is_expired_at(now));
        assert!(!token.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_default_redirect_uri_only_for_single_uri() {
        let mut client = OAuthClient {
            client_id: "c1".to_string(),
            client_secret: None,
            client_name: None,
            redirect_uris: vec!["https://app/cb".to_string()],
            grant_types: default_grant_types(),
            response_types: default_response_types(),
            scope: None,
            token_endpoint_auth_method: "none".to_string(),
            client_id_issued_at: Utc::now(),
        };
        assert_eq!(client.default_redirect_uri(), Some("https://app/cb"));

        client.redirect_uris.push("https://app/other".to_string());
        assert_eq!(client.default_redirect_uri(), None);
        assert!(client.allows_redirect_uri("https://app/other"));
        assert!(!client.allows_redirect_uri("https://evil/cb"));
    }

    #[test]
    fn test_expires_at_serialized_as_epoch_seconds() {
        let code = AuthorizationCode {
            code: "mcp_code".to_string(),
            client_id: "c1".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            redirect_uri_provided_explicitly: true,
            expires_at: DateTime::from_timestamp(1_700_000_300, 0).unwrap(),
            scopes: vec!["user".to_string()],
            code_challenge: "abc".to_string(),
            resource: None,
            subject: "demo".to_string(),
        };

        let json = serde_json::to_value(&code).unwrap();
        assert_eq!(json["expires_at"], 1_700_000_300);
    }

    #[test]
    fn test_inactive_introspection_is_minimal() {
        let json = serde_json::to_value(IntrospectionResponse::inactive()).unwrap();
        assert_eq!(json, serde_json::json!({ "active": false }));
    }
}
