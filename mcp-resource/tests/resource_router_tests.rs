//! HTTP behaviour of the resource server router
//!
//! The introspection endpoint and the authorization server discovery
//! documents are served by a wiremock instance.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use mcp_simple_auth_resource::{
    IntrospectionVerifier, ResourceServerSettings, ResourceServerState, resource_router,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SERVER_URL: &str = "http://localhost:8001/mcp";

fn settings(auth_server_url: &str) -> ResourceServerSettings {
    ResourceServerSettings {
        server_url: SERVER_URL.to_string(),
        auth_server_url: auth_server_url.to_string(),
        introspection_timeout_secs: 1,
        ..Default::default()
    }
}

fn app_for(settings: ResourceServerSettings) -> Router {
    let verifier = Arc::new(IntrospectionVerifier::from_settings(&settings).unwrap());
    resource_router(ResourceServerState::new(settings).unwrap(), verifier)
}

/// Mock AS answering introspection for `mcp_good` (scope `user`) and
/// `mcp_admin` (scope `admin`); every other token is inactive
async fn mock_auth_server() -> MockServer {
    let server = MockServer::start().await;
    for (token, scope) in [("mcp_good", "user"), ("mcp_admin", "admin")] {
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .and(body_string_contains(format!("token={token}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "client_id": "client-1",
                "scope": scope,
                "exp": 4_102_444_800i64,
                "aud": SERVER_URL,
                "username": "demo",
            })))
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "active": false })))
        .mount(&server)
        .await;
    server
}

fn rpc(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

async fn call_mcp(app: &Router, token: Option<&str>, body: Value) -> (StatusCode, String, Value) {
    let mut builder = Request::builder()
        .uri("/mcp")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, challenge, json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_missing_token_gets_challenge() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (status, challenge, body) = call_mcp(&app, None, rpc(1, "tools/list", json!({}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(challenge.starts_with("Bearer realm=\"mcp\""));
    assert!(challenge.contains(
        "resource_metadata=\"http://localhost:8001/.well-known/oauth-protected-resource/mcp\""
    ));
    assert!(!challenge.contains("error="));
    assert_eq!(body["error"], "invalid_token");
    assert_eq!(body["error_description"], "Authentication required");
}

#[tokio::test]
async fn test_inactive_token_rejected() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (status, challenge, _) =
        call_mcp(&app, Some("mcp_revoked"), rpc(1, "tools/list", json!({}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(challenge.contains("error=\"invalid_token\""));
}

#[tokio::test]
async fn test_valid_token_lists_tools() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (status, _, body) = call_mcp(&app, Some("mcp_good"), rpc(7, "tools/list", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 7);
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["get_time", "get_meaning_of_67"]);
    assert_eq!(
        body["result"]["tools"][0]["_meta"]["ui"]["resourceUri"],
        "ui://widget/tool-output.html"
    );
}

#[tokio::test]
async fn test_valid_token_calls_tool() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (status, _, body) = call_mcp(
        &app,
        Some("mcp_good"),
        rpc(
            2,
            "tools/call",
            json!({ "name": "get_meaning_of_67", "arguments": { "user_context": "tester" } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["structuredContent"]["user_context"], "tester");
}

#[tokio::test]
async fn test_initialize_and_unknown_method() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (_, _, body) = call_mcp(
        &app,
        Some("mcp_good"),
        rpc(1, "initialize", json!({ "protocolVersion": "2025-06-18" })),
    )
    .await;
    assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
    assert!(body["result"]["capabilities"]["tools"].is_object());

    assert!(body["result"]["capabilities"]["resources"].is_object());

    let (status, _, body) =
        call_mcp(&app, Some("mcp_good"), rpc(2, "prompts/list", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_null_id_gets_a_response() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (status, _, body) = call_mcp(
        &app,
        Some("mcp_good"),
        json!({ "jsonrpc": "2.0", "id": null, "method": "ping" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jsonrpc"], "2.0");
    assert!(body["id"].is_null());
    assert_eq!(body["result"], json!({}));
}

#[tokio::test]
async fn test_widget_resource_list_and_read() {
    let server = mock_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let widget_path = dir.path().join("tool-output.html");
    std::fs::write(&widget_path, "<html>tool output</html>").unwrap();
    let app = app_for(ResourceServerSettings {
        widget_path,
        ..settings(&server.uri())
    });

    let (status, _, body) =
        call_mcp(&app, Some("mcp_good"), rpc(1, "resources/list", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let resources = body["result"]["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["uri"], "ui://widget/tool-output.html");
    assert_eq!(resources[0]["mimeType"], "text/html;profile=mcp-app");

    let (status, _, body) = call_mcp(
        &app,
        Some("mcp_good"),
        rpc(2, "resources/read", json!({ "uri": "ui://widget/tool-output.html" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let contents = &body["result"]["contents"][0];
    assert_eq!(contents["text"], "<html>tool output</html>");
    assert_eq!(contents["_meta"]["ui"]["prefersBorder"], true);

    let (_, _, body) = call_mcp(
        &app,
        Some("mcp_good"),
        rpc(3, "resources/read", json!({ "uri": "ui://widget/other.html" })),
    )
    .await;
    assert_eq!(body["result"]["contents"], json!([]));
    assert_eq!(
        body["result"]["_meta"]["error"],
        "Unknown resource: ui://widget/other.html"
    );
}

#[tokio::test]
async fn test_widget_read_without_bundle_is_an_error() {
    let server = mock_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let app = app_for(ResourceServerSettings {
        widget_path: dir.path().join("missing.html"),
        ..settings(&server.uri())
    });

    let (status, _, body) = call_mcp(
        &app,
        Some("mcp_good"),
        rpc(1, "resources/read", json!({ "uri": "ui://widget/tool-output.html" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], -32603);
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Widget HTML not found at")
    );

    // Listing does not need the bundle
    let (_, _, body) = call_mcp(&app, Some("mcp_good"), rpc(2, "resources/list", json!({}))).await;
    assert!(body["result"]["resources"].is_array());
}

#[tokio::test]
async fn test_widget_read_requires_uri() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (_, _, body) = call_mcp(&app, Some("mcp_good"), rpc(1, "resources/read", json!({}))).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_notification_accepted_without_body() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (status, _, _) = call_mcp(
        &app,
        Some("mcp_good"),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_insufficient_scope_is_forbidden() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let (status, challenge, body) =
        call_mcp(&app, Some("mcp_admin"), rpc(1, "tools/list", json!({}))).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(challenge.contains("error=\"insufficient_scope\""));
    assert!(challenge.contains("scope=\"user\""));
    assert_eq!(body["error"], "insufficient_scope");
}

#[tokio::test]
async fn test_unreachable_auth_server_is_401_not_5xx() {
    let app = app_for(settings("http://127.0.0.1:1"));

    let (status, challenge, body) =
        call_mcp(&app, Some("mcp_good"), rpc(1, "tools/list", json!({}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(challenge.contains("error=\"invalid_token\""));
    assert_eq!(body["error_description"], "Token could not be validated");
}

#[tokio::test]
async fn test_protected_resource_metadata() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    for uri in [
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-protected-resource/mcp",
    ] {
        let (status, body) = get_json(&app, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resource"], SERVER_URL);
        assert_eq!(body["authorization_servers"], json!([server.uri()]));
        assert_eq!(body["scopes_supported"], json!(["user"]));
        assert_eq!(body["bearer_methods_supported"], json!(["header"]));
    }
}

#[tokio::test]
async fn test_authorization_server_metadata_is_proxied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "registration_endpoint": format!("{}/register", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;
    let app = app_for(settings(&server.uri()));

    let (status, body) = get_json(&app, "/.well-known/oauth-authorization-server").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registration_endpoint"], format!("{}/register", server.uri()));
}

#[tokio::test]
async fn test_discovery_falls_back_when_auth_server_down() {
    let app = app_for(settings("http://127.0.0.1:1"));

    let (status, body) = get_json(&app, "/.well-known/oauth-authorization-server").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["issuer"], "http://127.0.0.1:1");
    assert_eq!(body["token_endpoint"], "http://127.0.0.1:1/token");
    assert_eq!(body["code_challenge_methods_supported"], json!(["S256"]));

    let (status, body) = get_json(&app, "/.well-known/openid-configuration").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorization_endpoint"], "http://127.0.0.1:1/authorize");
}

#[tokio::test]
async fn test_cors_exposes_challenge_header() {
    let server = mock_auth_server().await;
    let app = app_for(settings(&server.uri()));

    let request = Request::builder()
        .uri("/mcp")
        .method("POST")
        .header(header::ORIGIN, "http://localhost:6274")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let exposed = response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("www-authenticate"));
}
