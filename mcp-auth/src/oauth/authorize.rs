//! OAuth 2.1 Authorization Endpoint with PKCE, and the demo login surface
//!
//! `/authorize` validates the request and hands the user agent to `/login`
//! with an opaque `state`. The login form posts to `/login/callback`, which
//! redirects back to the client with `code` and `state`.

use crate::oauth::{
    ApiError, AuthServerState,
    engine::{FlowError, construct_redirect_uri},
    models::{AuthorizationParams, AuthorizeRequest, LoginForm, OAuthError},
    pkce::{S256, validate_code_challenge},
};
use axum::{
    Form,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

/// GET /authorize
///
/// # Query Parameters
/// - `response_type`: Must be "code"
/// - `client_id`: Registered client identifier
/// - `redirect_uri`: Must match one of client's registered URIs; may be
///   omitted when the client registered exactly one
/// - `state`: Opaque value echoed back to the client
/// - `code_challenge`: PKCE S256 code challenge
/// - `code_challenge_method`: Must be "S256"
/// - `resource`: (Optional) RFC 8707 resource indicator
/// - `scope`: (Optional) Space-separated scopes
pub async fn authorize_get(
    State(state): State<AuthServerState>,
    Query(request): Query<AuthorizeRequest>,
) -> Result<Response, ApiError> {
    handle_authorize(&state, request).await
}

/// POST /authorize, same parameters as a form body
pub async fn authorize_post(
    State(state): State<AuthServerState>,
    Form(request): Form<AuthorizeRequest>,
) -> Result<Response, ApiError> {
    handle_authorize(&state, request).await
}

async fn handle_authorize(
    state: &AuthServerState,
    request: AuthorizeRequest,
) -> Result<Response, ApiError> {
    let client = state
        .engine
        .get_client(&request.client_id)
        .await?
        .ok_or_else(|| FlowError::UnknownClient(request.client_id.clone()))?;

    // Until the redirect URI is trusted, errors are shown to the user agent
    // instead of being redirected
    let (redirect_uri, provided_explicitly) = match request.redirect_uri {
        Some(uri) if client.allows_redirect_uri(&uri) => (uri, true),
        Some(uri) => {
            return Err(FlowError::InvalidRedirectUri(format!(
                "{uri} is not registered for this client"
            ))
            .into());
        }
        None => match client.default_redirect_uri() {
            Some(uri) => (uri.to_string(), false),
            None => {
                return Err(FlowError::InvalidRedirectUri(
                    "redirect_uri is required when several are registered".to_string(),
                )
                .into());
            }
        },
    };

    let client_state = request.state.as_deref();

    if request.response_type != "code" {
        return redirect_error(
            &redirect_uri,
            OAuthError::unsupported_response_type("response_type must be 'code'"),
            client_state,
        );
    }
    if request.code_challenge_method != S256 {
        return redirect_error(
            &redirect_uri,
            OAuthError::invalid_request("code_challenge_method must be 'S256'"),
            client_state,
        );
    }
    if !validate_code_challenge(&request.code_challenge) {
        return redirect_error(
            &redirect_uri,
            OAuthError::invalid_request("Invalid code_challenge format"),
            client_state,
        );
    }

    let mcp_scope = &state.settings.mcp_scope;
    let mut scopes: Vec<String> = request
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if let Some(unknown) = scopes.iter().find(|s| *s != mcp_scope) {
        return redirect_error(
            &redirect_uri,
            OAuthError::invalid_scope(format!("Unsupported scope: {unknown}")),
            client_state,
        );
    }
    if scopes.is_empty() {
        scopes.push(mcp_scope.clone());
    }
    scopes.dedup();

    if let Some(resource) = &request.resource {
        if !is_valid_resource(resource) {
            return redirect_error(
                &redirect_uri,
                OAuthError::invalid_target("resource must be an absolute URI without fragment"),
                client_state,
            );
        }
    }

    let params = AuthorizationParams {
        state: request.state,
        scopes,
        code_challenge: request.code_challenge,
        redirect_uri,
        redirect_uri_provided_explicitly: provided_explicitly,
        resource: request.resource,
    };

    let login_url = state.engine.authorize(&client, params).await?;
    debug!(client_id = %client.client_id, "Redirecting to login page");
    Ok(found(&login_url))
}

/// RFC 8707 Section 2: absolute URI, no fragment
fn is_valid_resource(resource: &str) -> bool {
    url::Url::parse(resource).is_ok_and(|u| u.fragment().is_none())
}

/// 302 Found with a `Location` header
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// RFC 6749 Section 4.1.2.1: report the error to the client's redirect URI
fn redirect_error(
    redirect_uri: &str,
    error: OAuthError,
    state: Option<&str>,
) -> Result<Response, ApiError> {
    let mut params = vec![("error", error.error.as_str())];
    if let Some(description) = error.error_description.as_deref() {
        params.push(("error_description", description));
    }
    if let Some(state) = state {
        params.push(("state", state));
    }
    let location = construct_redirect_uri(redirect_uri, &params)?;
    Ok(found(&location))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub state: String,
    pub client_id: Option<String>,
}

/// GET /login - demo credential form
pub async fn login_page(
    State(state): State<AuthServerState>,
    Query(query): Query<LoginQuery>,
) -> Html<String> {
    Html(render_login_form(
        &query.state,
        query.client_id.as_deref().unwrap_or("unknown"),
        &state.settings.demo_username,
    ))
}

/// POST /login/callback
///
/// 302 to the client on success, 400 for an unknown or expired `state`,
/// 401 for wrong credentials.
pub async fn login_callback(
    State(state): State<AuthServerState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    let redirect = state
        .engine
        .handle_callback(&form.username, &form.password, &form.state)
        .await?;
    Ok(found(&redirect))
}

fn render_login_form(state: &str, client_id: &str, demo_username: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>MCP Demo Authentication</title>
    <style>
        body {{ font-family: Arial, sans-serif; max-width: 500px; margin: 50px auto; padding: 20px; }}
        .login-box {{ border: 1px solid #ccc; padding: 20px; border-radius: 5px; }}
        .field {{ margin: 10px 0; }}
        input[type=text], input[type=password] {{ width: 100%; padding: 8px; }}
        button {{ padding: 10px 20px; cursor: pointer; background-color: #4CAF50; color: white; border: none; }}
    </style>
</head>
<body>
    <div class="login-box">
        <h2>MCP Demo Authentication</h2>
        <p><strong>Client:</strong> {client}</p>
        <p>Demo user: <code>{user}</code></p>

        <form method="POST" action="/login/callback">
            <input type="hidden" name="state" value="{state}">
            <div class="field">
                <label>Username <input type="text" name="username" value="{user}" required></label>
            </div>
            <div class="field">
                <label>Password <input type="password" name="password" required></label>
            </div>
            <button type="submit">Sign In</button>
        </form>
    </div>
</body>
</html>"#,
        client = escape_html(client_id),
        user = escape_html(demo_username),
        state = escape_html(state),
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
