//! MCP protocol dispatcher.
//!
//! Routes JSON-RPC methods to the tool registry and shapes every reply.
//! Errors never cross this boundary as anything but a JSON-RPC error object;
//! notifications never get a reply at all.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::errors::McpError;
use crate::tools::ToolRegistry;

pub mod types;

pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Protocol revision implemented by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// Name advertised in `serverInfo`.
pub const SERVER_NAME: &str = "daydreamer-memory";

pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    strict_arguments: bool,
}

impl Dispatcher {
    pub fn new(tools: Arc<ToolRegistry>, strict_arguments: bool) -> Self {
        Self {
            tools,
            strict_arguments,
        }
    }

    /// Handle one message. `None` means "no reply" (notification).
    #[tracing::instrument(skip_all, fields(method = %request.method))]
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!("notification received, no reply");
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let result = self.route(&request).await;

        Some(match result {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, &error),
        })
    }

    async fn route(&self, request: &JsonRpcRequest) -> Result<Value, McpError> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "tools/list" => Ok(json!({ "tools": self.tools.descriptors() })),
            "tools/call" => self.call_tool(request.params.as_ref()).await,
            "prompts/list" => Ok(json!({ "prompts": [] })),
            "resources/list" => Ok(json!({ "resources": [] })),
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            other => Err(McpError::method_not_found(other)),
        }
    }

    async fn call_tool(&self, params: Option<&Value>) -> Result<Value, McpError> {
        let params = params.ok_or_else(|| McpError::invalid_params("tools/call requires params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("tools/call requires a 'name' field"))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        self.tools
            .validate_arguments(name, &arguments, self.strict_arguments)?;

        let result = self.tools.call(name, arguments).await?;
        let rendered = serde_json::to_string(&result)
            .map_err(|e| McpError::internal(format!("result serialization failed: {e}")))?;

        Ok(json!({
            "content": [{ "type": "text", "text": rendered }],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(ToolRegistry::for_tests()), false)
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server_info() {
        let response = dispatcher()
            .dispatch(request("initialize", json!({})))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_returns_all_seventeen_descriptors() {
        let response = dispatcher()
            .dispatch(request("tools/list", json!({})))
            .await
            .unwrap();
        let tools = response.result.unwrap();
        let tools = tools["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 17);
        for tool in tools {
            assert!(tool["name"].is_string());
            assert!(tool["description"].is_string());
            assert!(tool["inputSchema"].is_object());
        }
    }

    #[tokio::test]
    async fn prompts_and_resources_lists_are_empty() {
        for (method, key) in [
            ("prompts/list", "prompts"),
            ("resources/list", "resources"),
            ("resources/templates/list", "resourceTemplates"),
        ] {
            let response = dispatcher()
                .dispatch(request(method, json!({})))
                .await
                .unwrap();
            assert_eq!(response.result.unwrap()[key], json!([]));
        }
    }

    #[tokio::test]
    async fn unknown_methods_return_method_not_found() {
        let response = dispatcher()
            .dispatch(request("shenanigans/do", json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let mut notification = request("notifications/initialized", json!({}));
        notification.id = None;
        assert!(dispatcher().dispatch(notification).await.is_none());
    }

    #[tokio::test]
    async fn tool_call_with_invalid_arguments_is_rejected() {
        let response = dispatcher()
            .dispatch(request(
                "tools/call",
                json!({"name": "search_nodes", "arguments": {"limit": 5}}),
            ))
            .await
            .unwrap();
        // `query` is required by the input schema.
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_not_found() {
        let response = dispatcher()
            .dispatch(request(
                "tools/call",
                json!({"name": "no_such_tool", "arguments": {}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn strict_mode_rejects_unknown_argument_fields() {
        let dispatcher = Dispatcher::new(Arc::new(ToolRegistry::for_tests()), true);
        let response = dispatcher
            .dispatch(request(
                "tools/call",
                json!({"name": "search_nodes", "arguments": {"query": "x", "bogus": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }
}
