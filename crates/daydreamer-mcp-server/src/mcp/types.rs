//! JSON-RPC 2.0 framing for the MCP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::McpError;

pub const JSONRPC_VERSION: &str = "2.0";

/// An incoming JSON-RPC message. A missing `id` makes it a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.method.starts_with("notifications/")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code: error.code,
                message: error.message.clone(),
                data: Some(serde_json::json!({ "category": error.category })),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_without_id_are_notifications() {
        let request: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "tools/list"})).unwrap();
        assert!(request.is_notification());
    }

    #[test]
    fn notifications_methods_are_notifications_even_with_id() {
        let request: JsonRpcRequest = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": 7, "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(request.is_notification());
    }

    #[test]
    fn success_responses_omit_error() {
        let response = JsonRpcResponse::success(json!(1), json!({"ok": true}));
        let rendered = serde_json::to_string(&response).unwrap();
        assert!(rendered.contains("\"result\""));
        assert!(!rendered.contains("\"error\""));
    }

    #[test]
    fn failure_responses_carry_code_and_category() {
        let response = JsonRpcResponse::failure(json!(1), &McpError::timeout("too slow"));
        let rendered = serde_json::to_value(&response).unwrap();
        assert_eq!(rendered["error"]["code"], -32000);
        assert_eq!(rendered["error"]["data"]["category"], "timeout");
    }
}
