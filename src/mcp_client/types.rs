//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 frames, MCP protocol structures, server configuration and
//! the connection/capability types handed out by the registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent in the `initialize` request.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Numeric request id, if the server echoed one we can correlate.
    pub fn numeric_id(&self) -> Option<u64> {
        match &self.id {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// An inbound frame, classified by shape.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Server-initiated request that expects a reply.
    Request {
        id: serde_json::Value,
        method: String,
    },
    /// Server-initiated notification.
    Notification { method: String },
}

impl InboundMessage {
    /// Classify a raw frame. Returns `None` for values that are not JSON-RPC.
    pub fn classify(frame: serde_json::Value) -> Option<Self> {
        let obj = frame.as_object()?;
        let method = obj.get("method").and_then(|m| m.as_str()).map(String::from);
        let id = obj.get("id").cloned().filter(|id| !id.is_null());

        match (method, id) {
            (Some(method), Some(id)) => Some(Self::Request { id, method }),
            (Some(method), None) => Some(Self::Notification { method }),
            (None, Some(_)) => serde_json::from_value(frame).ok().map(Self::Response),
            (None, None) => None,
        }
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Client identity sent during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Server identity returned by `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub client_info: ClientInfo,
}

/// `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: ServerInfo,
}

/// `tools/list` page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// `prompts/list` page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsListResult {
    #[serde(default)]
    pub prompts: Vec<PromptDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// `resources/list` page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Tool metadata fetched from a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// Prompt template metadata fetched from a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

/// One declared argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Addressable resource metadata fetched from a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// `prompts/get` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// One rendered prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: serde_json::Value,
}

/// `resources/read` result. Contents stay opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContents {
    #[serde(default)]
    pub contents: Vec<serde_json::Value>,
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// Transport kind names accepted in [`ServerConfig::transport`].
pub mod transport_kinds {
    /// Subprocess with newline-delimited JSON over stdio.
    pub const STDIO: &str = "stdio";
    /// Streamable HTTP.
    pub const HTTP: &str = "http";
    /// Server-sent events stream plus POST endpoint.
    pub const SSE: &str = "sse";
}

/// A registered tool server, as persisted by the configuration store.
///
/// The transport kind stays a plain string here so an unknown kind survives
/// loading and is reported when the registry tries to build an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    pub transport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Working directory for pipe transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Static headers for HTTP-based transports.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ServerConfig {
    /// Config for a subprocess server.
    pub fn stdio(id: &str, name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            transport: transport_kinds::STDIO.to_string(),
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
        }
    }

    /// Config for a URL-addressed server (`http` or `sse`).
    pub fn remote(id: &str, name: &str, transport: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            transport: transport.to_string(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: Some(url.to_string()),
            headers: HashMap::new(),
        }
    }
}

// ─── Connection State ────────────────────────────────────────────────────────

/// Status of one server's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Current status of one server's connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub server_id: String,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// State reported for a server the registry does not hold.
    pub fn disconnected(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            status: ConnectionStatus::Disconnected,
            error: None,
            connected_at: None,
        }
    }

    pub(crate) fn connecting(server_id: &str) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            ..Self::disconnected(server_id)
        }
    }

    pub(crate) fn connected(server_id: &str) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            connected_at: Some(Utc::now()),
            ..Self::disconnected(server_id)
        }
    }

    pub(crate) fn failed(server_id: &str, error: String) -> Self {
        Self {
            status: ConnectionStatus::Error,
            error: Some(error),
            ..Self::disconnected(server_id)
        }
    }

    /// Whether the status is `connected`.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

// ─── Call Results ────────────────────────────────────────────────────────────

/// One inline binary output of a tool call (base64 payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryItem {
    pub data: String,
    pub mime_type: String,
}

/// Normalized outcome of one tool invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    /// All text blocks joined by `\n`; empty when there were none.
    pub text_content: String,
    pub binary_items: Vec<BinaryItem>,
    /// The untouched protocol result.
    pub raw: serde_json::Value,
    /// The server flagged the result as a tool-level failure (`isError`).
    pub is_error: bool,
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_classify_response() {
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 7, "result": {"tools": []}});
        match InboundMessage::classify(frame) {
            Some(InboundMessage::Response(resp)) => {
                assert_eq!(resp.numeric_id(), Some(7));
                assert!(resp.result.is_some());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_string_id_response() {
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": "12", "result": {}});
        match InboundMessage::classify(frame) {
            Some(InboundMessage::Response(resp)) => assert_eq!(resp.numeric_id(), Some(12)),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_notification_and_request() {
        let notif = serde_json::json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"});
        assert!(matches!(
            InboundMessage::classify(notif),
            Some(InboundMessage::Notification { .. })
        ));

        let req = serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "ping"});
        assert!(matches!(
            InboundMessage::classify(req),
            Some(InboundMessage::Request { ref method, .. }) if method == "ping"
        ));

        assert!(InboundMessage::classify(serde_json::json!({"hello": 1})).is_none());
        assert!(InboundMessage::classify(serde_json::json!("text")).is_none());
    }

    #[test]
    fn test_server_config_wire_shape() {
        let json = r#"{
            "id": "files",
            "name": "File Server",
            "transport": "stdio",
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.transport, transport_kinds::STDIO);
        assert_eq!(config.args.len(), 3);
        assert!(config.url.is_none());

        let back = serde_json::to_value(&config).unwrap();
        assert!(back.get("url").is_none());
        assert!(back.get("headers").is_none());
    }

    #[test]
    fn test_connection_state_serialization() {
        let state = ConnectionState::failed("web", "refused".into());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["serverId"], "web");
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "refused");
        assert!(json.get("connectedAt").is_none());

        let connected = ConnectionState::connected("web");
        assert!(connected.is_connected());
        assert!(connected.connected_at.is_some());
    }

    #[test]
    fn test_tool_descriptor_wire_format() {
        let json = r#"{"name": "read_file", "inputSchema": {"type": "object", "required": ["path"]}}"#;
        let tool: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert!(tool.description.is_none());
        assert_eq!(tool.input_schema.unwrap()["required"][0], "path");
    }

    #[test]
    fn test_prompt_argument_required_defaults_false() {
        let json = r#"{"name": "summarize", "arguments": [{"name": "topic"}]}"#;
        let prompt: PromptDescriptor = serde_json::from_str(json).unwrap();
        let args = prompt.arguments.unwrap();
        assert_eq!(args[0].name, "topic");
        assert!(!args[0].required);
    }
}
