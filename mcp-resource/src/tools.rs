//! Protected MCP endpoint
//!
//! A minimal JSON-RPC 2.0 surface: `initialize`, `ping`, `tools/list` and
//! `tools/call` for two demo tools, plus `resources/list` and
//! `resources/read` for the widget that renders their output. Requests only
//! reach this handler after the bearer middleware accepted their token.

use crate::ResourceServerState;
use crate::verifier::AccessVerdict;
use crate::widget;
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// JSON-RPC error codes
pub mod error_codes {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Absent for notifications; an explicit `null` is still a request
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
}

/// `Some` whenever the field is present, `null` included
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// POST /mcp
pub async fn mcp_endpoint(
    State(state): State<ResourceServerState>,
    Extension(verdict): Extension<AccessVerdict>,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    let Some(id) = request.id else {
        // Notifications get no JSON-RPC response
        return StatusCode::ACCEPTED.into_response();
    };

    if request.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::failure(
            id,
            error_codes::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        ))
        .into_response();
    }

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(id, initialize_result(&request.params)),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tool_definitions() })),
        "tools/call" => match request.params.get("name").and_then(Value::as_str) {
            Some(name) => {
                info!(
                    tool = name,
                    client_id = %verdict.client_id,
                    subject = verdict.subject.as_deref().unwrap_or("unknown"),
                    "Calling tool"
                );
                let arguments = request.params.get("arguments").unwrap_or(&Value::Null);
                JsonRpcResponse::success(id, call_tool(name, arguments))
            }
            None => JsonRpcResponse::failure(
                id,
                error_codes::INVALID_PARAMS,
                "tools/call requires a tool name",
            ),
        },
        "resources/list" => {
            JsonRpcResponse::success(id, json!({ "resources": widget::resource_definitions() }))
        }
        "resources/read" => match request.params.get("uri").and_then(Value::as_str) {
            Some(uri) => match state.widget.read(uri).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => {
                    warn!(error = %e, "Widget resource unavailable");
                    JsonRpcResponse::failure(id, error_codes::INTERNAL_ERROR, e.to_string())
                }
            },
            None => JsonRpcResponse::failure(
                id,
                error_codes::INVALID_PARAMS,
                "resources/read requires a uri",
            ),
        },
        other => JsonRpcResponse::failure(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };

    Json(response).into_response()
}

fn initialize_result(params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": {}, "resources": {} },
        "serverInfo": {
            "name": "MCP Resource Server",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": "Resource Server that validates tokens via Authorization Server introspection",
    })
}

pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "get_time",
            "title": "Get Time",
            "description": "Get the current server time.\n\nThis tool demonstrates that system information can be protected by OAuth authentication. User must be authenticated to access it.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            },
            "_meta": widget::tool_meta(),
        },
        {
            "name": "get_meaning_of_67",
            "title": "Get Meaning of 67",
            "description": "Gets the meaning of 67.\n\nThis tool demonstrates that system information can be protected by OAuth authentication. User must be authenticated to access it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "user_context": {
                        "type": "string",
                        "default": "",
                        "description": "Optional context about user preferences, income, etc.",
                    }
                },
                "additionalProperties": false,
            },
            "_meta": widget::tool_meta(),
        },
    ])
}

/// `CallToolResult`; unknown tools are a tool-level error, not a protocol error
pub fn call_tool(name: &str, arguments: &Value) -> Value {
    let result = match name {
        "get_time" => {
            let now = Utc::now();
            json!({
                "current_time": now.to_rfc3339(),
                "timezone": "UTC",
                "timestamp": now.timestamp_millis() as f64 / 1000.0,
                "formatted": now.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
        }
        "get_meaning_of_67" => {
            let user_context = arguments
                .get("user_context")
                .and_then(Value::as_str)
                .unwrap_or_default();
            json!({
                "definition": "67 does not mean anything other than...the kids are alright.",
                "user_context": user_context,
            })
        }
        unknown => {
            return json!({
                "content": [{ "type": "text", "text": format!("Unknown tool: {unknown}") }],
                "isError": true,
            });
        }
    };

    json!({
        "content": [{ "type": "text", "text": result.to_string() }],
        "structuredContent": result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["get_time", "get_meaning_of_67"]);
        for tool in tools.as_array().unwrap() {
            assert_eq!(tool["_meta"]["ui"]["resourceUri"], widget::WIDGET_URI);
        }
    }

    #[test]
    fn test_null_id_is_a_request() {
        let request: JsonRpcRequest =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "method": "ping", "id": null }))
                .unwrap();
        assert_eq!(request.id, Some(Value::Null));

        let notification: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();
        assert_eq!(notification.id, None);
    }

    #[test]
    fn test_meaning_of_67_echoes_context() {
        let result = call_tool("get_meaning_of_67", &json!({ "user_context": "student" }));
        assert_eq!(result["structuredContent"]["user_context"], "student");
        assert!(result.get("isError").is_none());
    }

    #[test]
    fn test_get_time_fields() {
        let result = call_tool("get_time", &Value::Null);
        let structured = &result["structuredContent"];
        assert_eq!(structured["timezone"], "UTC");
        assert!(structured["timestamp"].is_f64());
        assert_eq!(structured["formatted"].as_str().unwrap().len(), 19);
    }

    #[test]
    fn test_unknown_tool_is_error_result() {
        let result = call_tool("rm_rf", &Value::Null);
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Unknown tool: rm_rf");
    }

    #[test]
    fn test_initialize_echoes_protocol_version() {
        let result = initialize_result(&json!({ "protocolVersion": "2025-03-26" }));
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(initialize_result(&Value::Null)["protocolVersion"], PROTOCOL_VERSION);
    }
}
