//! MCP-Style Tool Surface
//!
//! A minimal JSON-RPC 2.0 endpoint (`POST /mcp`) exposing the memory and
//! reasoning engines as callable tools: `initialize`, `ping`,
//! `tools/list`, and `tools/call`.

pub mod tools;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::state::SharedState;

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

/// Advertised protocol revision
pub const PROTOCOL_VERSION: &str = "2025-03-26";

// ============================================================================
// JSON-RPC TYPES
// ============================================================================

/// JSON-RPC Request
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC Response
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC Error
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(message: &str) -> Self {
        Self {
            code: -32602,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn internal_error(message: &str) -> Self {
        Self {
            code: -32603,
            message: message.to_string(),
            data: None,
        }
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// `POST /mcp`
pub async fn handle(
    State(state): State<SharedState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let id = request.id.clone();
    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "engram",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {
                    "tools": { "listChanged": false },
                },
                "instructions": "Engram is a cognitive memory and reasoning server. Store \
                 memories, search them semantically, run maintenance and consolidation, and \
                 orchestrate parallel multi-stream reasoning.",
            }),
        ),
        "notifications/initialized" => JsonRpcResponse::success(id, json!({})),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tools::list() })),
        "tools/call" => handle_tool_call(&state, id, request.params).await,
        method => JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)),
    };
    Json(response)
}

async fn handle_tool_call(
    state: &SharedState,
    id: Option<Value>,
    params: Option<Value>,
) -> JsonRpcResponse {
    let Some(params) = params else {
        return JsonRpcResponse::error(id, JsonRpcError::invalid_params("missing params"));
    };
    let Some(name) = params["name"].as_str() else {
        return JsonRpcResponse::error(id, JsonRpcError::invalid_params("missing tool name"));
    };
    let arguments = params.get("arguments").cloned();

    match tools::execute(state, name, arguments).await {
        Ok(result) => JsonRpcResponse::success(
            id,
            json!({
                "content": [{
                    "type": "text",
                    "text": result.to_string(),
                }],
                "isError": false,
            }),
        ),
        Err(message) => {
            tracing::warn!(tool = name, error = %message, "tool call failed");
            JsonRpcResponse::error(id, JsonRpcError::internal_error(&message))
        }
    }
}
