//! Authorization Engine
//!
//! State machine of the authorization code flow:
//!
//! ```text
//! authorize ──> FlowState ──handle_callback──> AuthorizationCode ──exchange──> AccessToken
//! ```
//!
//! Every arrow consumes its input exactly once. Consumption goes through the
//! storage `take_*` primitives, so a replayed callback or a concurrent second
//! exchange of the same code observes nothing and fails.
//!
//! The engine holds no mutable state of its own; everything lives in the
//! [`OAuthStorage`] handle it is constructed with.

use crate::config::AuthServerSettings;
use crate::oauth::models::{
    AccessToken, AuthorizationCode, AuthorizationParams, FlowState, IntrospectionResponse,
    OAuthClient, OAuthError, TokenResponse, UserData,
};
use crate::oauth::storage::{OAuthStorage, OAuthStorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use mcp_simple_auth_logging::redact_token;
use rand::RngCore;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// Prefix of issued authorization codes and access tokens
pub const TOKEN_PREFIX: &str = "mcp_";

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid authorization code")]
    InvalidCode,

    #[error("Authorization code was not issued to this client")]
    ClientMismatch,

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    #[error("Store unavailable: {0}")]
    Storage(#[from] OAuthStorageError),
}

impl FlowError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FlowError::InvalidState
            | FlowError::InvalidCode
            | FlowError::ClientMismatch
            | FlowError::UnknownClient(_)
            | FlowError::InvalidRedirectUri(_) => StatusCode::BAD_REQUEST,
            FlowError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            FlowError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn to_oauth_error(&self) -> OAuthError {
        match self {
            FlowError::InvalidState | FlowError::InvalidRedirectUri(_) => {
                OAuthError::invalid_request(self.to_string())
            }
            FlowError::InvalidCredentials => OAuthError::access_denied(self.to_string()),
            FlowError::InvalidCode | FlowError::ClientMismatch => {
                OAuthError::invalid_grant(self.to_string())
            }
            FlowError::UnknownClient(_) => OAuthError::invalid_client(self.to_string()),
            // Storage details stay in the log
            FlowError::Storage(_) => {
                OAuthError::temporarily_unavailable("Authorization state store unavailable")
            }
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        if let FlowError::Storage(ref e) = self {
            error!(error = %e, "OAuth storage operation failed");
        }
        (self.status_code(), Json(self.to_oauth_error())).into_response()
    }
}

/// Engine parameters, derived from [`AuthServerSettings`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// External login surface the authorize step redirects to
    pub login_url: String,
    pub demo_username: String,
    pub demo_password: String,
    pub mcp_scope: String,
    pub auth_code_ttl: Duration,
    pub access_token_ttl: Duration,
    pub flow_state_ttl: Duration,
}

fn ttl(secs: u64) -> Duration {
    Duration::seconds(secs.min(i32::MAX as u64) as i64)
}

impl From<&AuthServerSettings> for EngineConfig {
    fn from(settings: &AuthServerSettings) -> Self {
        Self {
            login_url: settings.login_url(),
            demo_username: settings.demo_username.clone(),
            demo_password: settings.demo_password.clone(),
            mcp_scope: settings.mcp_scope.clone(),
            auth_code_ttl: ttl(settings.auth_code_ttl_secs),
            access_token_ttl: ttl(settings.access_token_ttl_secs),
            flow_state_ttl: ttl(settings.flow_state_ttl_secs),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&AuthServerSettings::default())
    }
}

/// OAuth authorization engine over an explicit storage handle
pub struct AuthorizationEngine {
    storage: Arc<dyn OAuthStorage>,
    config: EngineConfig,
    clock: Clock,
}

impl AuthorizationEngine {
    pub fn new(storage: Arc<dyn OAuthStorage>, config: EngineConfig) -> Self {
        Self {
            storage,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, e.g. to drive expiry in tests
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn storage(&self) -> &dyn OAuthStorage {
        self.storage.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    /// Persist a client; an existing registration with the same id is replaced
    pub async fn register_client(&self, client: &OAuthClient) -> Result<(), FlowError> {
        self.storage.save_client(client).await?;
        info!(client_id = %client.client_id, "Registered OAuth client");
        Ok(())
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, FlowError> {
        Ok(self.storage.get_client(client_id).await?)
    }

    // ------------------------------------------------------------------
    // Authorization flow
    // ------------------------------------------------------------------

    /// Record the flow state and return the login URL for the user agent
    pub async fn authorize(
        &self,
        client: &OAuthClient,
        params: AuthorizationParams,
    ) -> Result<String, FlowError> {
        let state = params.state.unwrap_or_else(|| random_hex(16));

        let flow_state = FlowState {
            state: state.clone(),
            client_id: client.client_id.clone(),
            redirect_uri: params.redirect_uri,
            redirect_uri_provided_explicitly: params.redirect_uri_provided_explicitly,
            code_challenge: params.code_challenge,
            scopes: params.scopes,
            resource: params.resource,
            expires_at: self.now() + self.config.flow_state_ttl,
        };
        self.storage.save_flow_state(&flow_state).await?;

        debug!(client_id = %client.client_id, "Stored authorization flow state");

        Ok(format!(
            "{}?state={}&client_id={}",
            self.config.login_url,
            urlencoding::encode(&state),
            urlencoding::encode(&client.client_id)
        ))
    }

    /// Check the demo credentials for a pending flow and issue a code.
    ///
    /// Returns the client redirect URI carrying `code` and the original
    /// `state`. A failed login leaves the flow state in place so the user can
    /// retry; a successful one consumes it.
    pub async fn handle_callback(
        &self,
        username: &str,
        password: &str,
        state: &str,
    ) -> Result<String, FlowError> {
        let now = self.now();

        if self.storage.get_flow_state(state, now).await?.is_none() {
            return Err(FlowError::InvalidState);
        }

        if !self.credentials_match(username, password) {
            warn!("Rejected login callback with invalid credentials");
            return Err(FlowError::InvalidCredentials);
        }

        // Claim the state; a concurrent callback that got here first wins
        let flow_state = self
            .storage
            .take_flow_state(state, now)
            .await?
            .ok_or(FlowError::InvalidState)?;

        let scopes = if flow_state.scopes.is_empty() {
            vec![self.config.mcp_scope.clone()]
        } else {
            flow_state.scopes
        };

        let auth_code = AuthorizationCode {
            code: format!("{TOKEN_PREFIX}{}", random_hex(16)),
            client_id: flow_state.client_id,
            redirect_uri: flow_state.redirect_uri,
            redirect_uri_provided_explicitly: flow_state.redirect_uri_provided_explicitly,
            expires_at: now + self.config.auth_code_ttl,
            scopes,
            code_challenge: flow_state.code_challenge,
            resource: flow_state.resource,
            subject: username.to_string(),
        };
        self.storage.save_authorization_code(&auth_code).await?;

        let user_data = UserData {
            username: username.to_string(),
            user_id: format!("user_{}", random_hex(8)),
            authenticated_at: now,
        };
        self.storage.save_user_data(username, &user_data).await?;

        info!(
            client_id = %auth_code.client_id,
            code = %redact_token(&auth_code.code),
            "Issued authorization code"
        );

        construct_redirect_uri(
            &auth_code.redirect_uri,
            &[("code", auth_code.code.as_str()), ("state", state)],
        )
    }

    /// Return the code if it exists and has not expired
    pub async fn load_authorization_code(
        &self,
        client: &OAuthClient,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, FlowError> {
        let auth_code = self.storage.get_authorization_code(code, self.now()).await?;
        if auth_code.is_none() {
            debug!(client_id = %client.client_id, "Authorization code not found or expired");
        }
        Ok(auth_code)
    }

    /// Consume an authorization code and mint an access token for it.
    ///
    /// The code must have been issued to `client`. Of several concurrent
    /// exchanges of one code, exactly one succeeds.
    pub async fn exchange_code_for_token(
        &self,
        client: &OAuthClient,
        code: &str,
    ) -> Result<TokenResponse, FlowError> {
        let now = self.now();

        let pending = self
            .storage
            .get_authorization_code(code, now)
            .await?
            .ok_or(FlowError::InvalidCode)?;
        if pending.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                code = %redact_token(code),
                "Authorization code presented by a different client"
            );
            return Err(FlowError::ClientMismatch);
        }

        let auth_code = self
            .storage
            .take_authorization_code(code, now)
            .await?
            .ok_or(FlowError::InvalidCode)?;

        let access_token = AccessToken {
            token: format!("{TOKEN_PREFIX}{}", random_hex(32)),
            client_id: client.client_id.clone(),
            scopes: auth_code.scopes.clone(),
            issued_at: now,
            expires_at: now + self.config.access_token_ttl,
            resource: auth_code.resource.clone(),
        };
        self.storage.save_access_token(&access_token).await?;

        let user_data = UserData {
            username: auth_code.subject.clone(),
            user_id: format!("user_{}", random_hex(8)),
            authenticated_at: now,
        };
        self.storage
            .save_user_data(&access_token.token, &user_data)
            .await?;

        let expires_in = self.config.access_token_ttl.num_seconds();
        info!(
            client_id = %client.client_id,
            token = %redact_token(&access_token.token),
            expires_in,
            "Exchanged authorization code for access token"
        );

        Ok(TokenResponse {
            access_token: access_token.token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope: auth_code.scopes.join(" "),
        })
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Return the token if it exists and `now < expires_at`
    pub async fn load_access_token(&self, token: &str) -> Result<Option<AccessToken>, FlowError> {
        Ok(self.storage.get_access_token(token, self.now()).await?)
    }

    /// Delete a token; unknown tokens are a successful no-op (RFC 7009)
    pub async fn revoke_token(&self, token: &str) -> Result<(), FlowError> {
        self.storage.delete_access_token(token).await?;
        self.storage.delete_user_data(token).await?;
        info!(token = %redact_token(token), "Revoked access token");
        Ok(())
    }

    /// RFC 7662 view of a token. Unknown, expired and revoked tokens are
    /// indistinguishable: all report `active: false`.
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, FlowError> {
        let Some(access_token) = self.load_access_token(token).await? else {
            return Ok(IntrospectionResponse::inactive());
        };

        let user = self.storage.get_user_data(&access_token.token).await?;

        Ok(IntrospectionResponse {
            active: true,
            client_id: Some(access_token.client_id),
            scope: Some(access_token.scopes.join(" ")),
            exp: Some(access_token.expires_at.timestamp()),
            iat: Some(access_token.issued_at.timestamp()),
            token_type: Some("Bearer".to_string()),
            aud: access_token.resource,
            sub: user.as_ref().map(|u| u.user_id.clone()),
            username: user.map(|u| u.username),
        })
    }

    pub async fn get_user_data(&self, key: &str) -> Result<Option<UserData>, FlowError> {
        Ok(self.storage.get_user_data(key).await?)
    }

    fn credentials_match(&self, username: &str, password: &str) -> bool {
        let user_ok = username
            .as_bytes()
            .ct_eq(self.config.demo_username.as_bytes());
        let pass_ok = password
            .as_bytes()
            .ct_eq(self.config.demo_password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

/// `bytes` bytes from the thread-local CSPRNG, hex encoded
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Append query parameters to a redirect URI, keeping any existing query
pub fn construct_redirect_uri(base: &str, params: &[(&str, &str)]) -> Result<String, FlowError> {
    let mut url =
        Url::parse(base).map_err(|e| FlowError::InvalidRedirectUri(format!("{base}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url.into())
}
