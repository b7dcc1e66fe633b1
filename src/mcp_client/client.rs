//! Protocol client for one server.
//!
//! Layers MCP request/response semantics over a [`Transport`]: a background
//! reader task routes responses to waiting requests by id, answers server
//! pings, and marks the client closed when the channel ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use super::errors::McpError;
use super::transport::{TaskGuard, Transport};
use super::types::{
    error_codes, ClientInfo, InboundMessage, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, PromptDescriptor, PromptResult, PromptsListResult, ResourceContents,
    ResourceDescriptor, ResourcesListResult, ServerInfo, ToolDescriptor, ToolsListResult,
    JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for a single request (ms).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Upper bound on pages followed by one discovery call.
const MAX_LIST_PAGES: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, McpError>>>>>;

// ─── ProtocolClient ──────────────────────────────────────────────────────────

/// A live connection to one MCP server.
pub struct ProtocolClient {
    server_id: String,
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
    server_info: Mutex<Option<ServerInfo>>,
    capabilities: Mutex<serde_json::Value>,
    _reader: TaskGuard,
}

impl ProtocolClient {
    /// Wrap an open transport and start the reader task.
    ///
    /// The handshake is not performed here; call [`initialize`](Self::initialize).
    pub fn new(server_id: &str, transport: Arc<dyn Transport>, call_timeout: Duration) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = TaskGuard::new(tokio::spawn(read_loop(
            server_id.to_string(),
            Arc::clone(&transport),
            Arc::clone(&pending),
            Arc::clone(&closed),
        )));

        Self {
            server_id: server_id.to_string(),
            transport,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            call_timeout,
            server_info: Mutex::new(None),
            capabilities: Mutex::new(serde_json::Value::Null),
            _reader: reader,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Whether the underlying channel has ended (e.g. the process exited).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Server identity reported during the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().ok().and_then(|info| info.clone())
    }

    /// Capabilities object reported during the handshake.
    pub fn capabilities(&self) -> serde_json::Value {
        self.capabilities
            .lock()
            .map(|caps| caps.clone())
            .unwrap_or(serde_json::Value::Null)
    }

    // ─── Handshake ───────────────────────────────────────────────────────

    /// Run `initialize` followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::InitFailed {
            name: self.server_id.clone(),
            reason: format!("failed to encode initialize params: {e}"),
        })?;

        let result = self.request("initialize", Some(params)).await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: self.server_id.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        if let Ok(mut info) = self.server_info.lock() {
            *info = Some(init.server_info.clone());
        }
        if let Ok(mut caps) = self.capabilities.lock() {
            *caps = init.capabilities.clone();
        }

        self.notify("notifications/initialized", None).await?;

        tracing::debug!(
            server = %self.server_id,
            remote = %init.server_info.name,
            remote_version = %init.server_info.version,
            protocol = ?init.protocol_version,
            "handshake complete"
        );
        Ok(init)
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    /// `tools/list`, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.list_paginated("tools/list", |page: ToolsListResult| {
            (page.tools, page.next_cursor)
        })
        .await
    }

    /// `prompts/list`, following pagination cursors.
    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, McpError> {
        self.list_paginated("prompts/list", |page: PromptsListResult| {
            (page.prompts, page.next_cursor)
        })
        .await
    }

    /// `resources/list`, following pagination cursors.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        self.list_paginated("resources/list", |page: ResourcesListResult| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    async fn list_paginated<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>, McpError>
    where
        P: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request(method, params).await?;
            let page: P = serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: self.server_id.clone(),
                reason: format!("malformed {method} result: {e}"),
            })?;
            let (mut batch, next) = split(page);
            items.append(&mut batch);

            match next {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => return Ok(items),
            }
        }

        tracing::warn!(server = %self.server_id, method, "pagination limit reached");
        Ok(items)
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// `tools/call`. Returns the raw protocol result.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        self.request(
            "tools/call",
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// `prompts/get` with string arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptResult, McpError> {
        let result = self
            .request(
                "prompts/get",
                Some(serde_json::json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: self.server_id.clone(),
            reason: format!("malformed prompts/get result: {e}"),
        })
    }

    /// `resources/read`.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents, McpError> {
        let result = self
            .request("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await?;
        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: self.server_id.clone(),
            reason: format!("malformed resources/read result: {e}"),
        })
    }

    // ─── Messaging ───────────────────────────────────────────────────────

    /// Send a request and wait for its result, bounded by the call timeout.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed {
                server: self.server_id.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        // Removes the waiter if this future is dropped or fails early.
        let _waiter = PendingGuard {
            id,
            pending: &self.pending,
        };

        let frame = serde_json::to_value(JsonRpcRequest::new(id, method, params)).map_err(|e| {
            McpError::TransportError {
                server: self.server_id.clone(),
                reason: format!("failed to encode request: {e}"),
            }
        })?;
        // The bound covers the send too: an HTTP POST can stall as well.
        let exchange = async {
            self.transport.send(frame).await?;
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(McpError::Closed {
                    server: self.server_id.clone(),
                }),
            }
        };

        match tokio::time::timeout(self.call_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: self.server_id.clone(),
                operation: method.to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut frame = serde_json::json!({ "jsonrpc": JSONRPC_VERSION, "method": method });
        if let Some(params) = params {
            frame["params"] = params;
        }
        self.transport.send(frame).await
    }

    /// Close the transport. The client is unusable afterwards.
    pub async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::Release);
        self.transport.close().await
    }
}

struct PendingGuard<'a> {
    id: u64,
    pending: &'a PendingMap,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

// ─── Reader Loop ─────────────────────────────────────────────────────────────

async fn read_loop(
    server_id: String,
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = transport.recv().await {
        match InboundMessage::classify(frame) {
            Some(InboundMessage::Response(response)) => {
                let Some(id) = response.numeric_id() else {
                    tracing::debug!(server = %server_id, "response with non-numeric id ignored");
                    continue;
                };
                let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(extract_result(response));
                    }
                    None => {
                        tracing::debug!(server = %server_id, id, "response for unknown request");
                    }
                }
            }
            Some(InboundMessage::Request { id, method }) => {
                let reply = if method == "ping" {
                    serde_json::json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": {} })
                } else {
                    tracing::debug!(server = %server_id, method = %method, "unsupported server request");
                    serde_json::json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "id": id,
                        "error": {
                            "code": error_codes::METHOD_NOT_FOUND,
                            "message": format!("method '{method}' is not supported by this client"),
                        },
                    })
                };
                if let Err(e) = transport.send(reply).await {
                    tracing::debug!(server = %server_id, error = %e, "failed to answer server request");
                }
            }
            Some(InboundMessage::Notification { method }) => {
                tracing::debug!(server = %server_id, method = %method, "server notification");
            }
            None => {
                tracing::debug!(server = %server_id, "ignoring non JSON-RPC frame");
            }
        }
    }

    closed.store(true, Ordering::Release);
    let waiters: Vec<_> = match pending.lock() {
        Ok(mut p) => p.drain().map(|(_, w)| w).collect(),
        Err(_) => Vec::new(),
    };
    for waiter in waiters {
        let _ = waiter.send(Err(McpError::Closed {
            server: server_id.clone(),
        }));
    }
    tracing::debug!(server = %server_id, "connection closed");
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::testing::{mock_server, Reply, ScriptedTransport};
    use crate::mcp_client::types::JsonRpcError;

    fn client_for(transport: Arc<ScriptedTransport>) -> ProtocolClient {
        ProtocolClient::new("mock", transport, Duration::from_millis(500))
    }

    #[test]
    fn test_extract_result_success() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: serde_json::json!(1),
            result: Some(serde_json::json!({"text": "hello"})),
            error: None,
        };
        let result = extract_result(resp).unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: serde_json::json!(1),
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        match extract_result(resp).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initialize_sends_initialized_notification() {
        let transport = Arc::new(ScriptedTransport::new(mock_server(vec!["echo"])));
        let client = client_for(Arc::clone(&transport));

        let init = client.initialize().await.unwrap();
        assert_eq!(init.server_info.name, "mock-server");
        assert_eq!(client.server_info().unwrap().name, "mock-server");

        let methods = transport.sent_methods();
        assert_eq!(methods, vec!["initialize", "notifications/initialized"]);
        let first = &transport.sent()[0];
        assert_eq!(first["params"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(first["params"]["clientInfo"]["name"], "mcpchat");
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let transport = Arc::new(ScriptedTransport::new(Arc::new(|method: &str, params: &serde_json::Value| {
            match (method, params.get("cursor").and_then(|c| c.as_str())) {
                ("tools/list", None) => Reply::Result(serde_json::json!({
                    "tools": [{"name": "a"}],
                    "nextCursor": "page2"
                })),
                ("tools/list", Some("page2")) => {
                    Reply::Result(serde_json::json!({"tools": [{"name": "b"}]}))
                }
                _ => Reply::Error(-32601, "nope".into()),
            }
        })));
        let client = client_for(transport);

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_server_error_is_propagated() {
        let transport = Arc::new(ScriptedTransport::new(Arc::new(|_: &str, _: &serde_json::Value| {
            Reply::Error(-32602, "bad arguments".into())
        })));
        let client = client_for(transport);

        let err = client.call_tool("x", serde_json::Value::Null).await.unwrap_err();
        assert!(matches!(err, McpError::ServerError { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let transport = Arc::new(ScriptedTransport::new(Arc::new(|_: &str, _: &serde_json::Value| Reply::Silent)));
        let client = ProtocolClient::new("mock", transport, Duration::from_millis(20));

        let err = client.call_tool("slow", serde_json::json!({})).await.unwrap_err();
        match err {
            McpError::Timeout {
                operation,
                timeout_ms,
                ..
            } => {
                assert_eq!(operation, "tools/call");
                assert_eq!(timeout_ms, 20);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert!(client.pending.lock().unwrap().is_empty());
    }

    /// Accepts the connection but never completes a send.
    struct StalledTransport;

    #[async_trait::async_trait]
    impl Transport for StalledTransport {
        async fn send(&self, _frame: serde_json::Value) -> Result<(), McpError> {
            std::future::pending().await
        }

        async fn recv(&self) -> Option<serde_json::Value> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), McpError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_call_timeout_covers_stalled_send() {
        let client = ProtocolClient::new(
            "stalled",
            Arc::new(StalledTransport),
            Duration::from_millis(50),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            client.call_tool("slow", serde_json::json!({})),
        )
        .await
        .expect("call should be bounded by the call timeout");

        assert!(matches!(
            result,
            Err(McpError::Timeout { timeout_ms: 50, .. })
        ));
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hang_up_fails_pending_and_marks_closed() {
        let transport = Arc::new(ScriptedTransport::new(Arc::new(|_: &str, _: &serde_json::Value| Reply::Silent)));
        let client = client_for(Arc::clone(&transport));

        let call = client.call_tool("wait", serde_json::json!({}));
        let hang_up = async {
            tokio::task::yield_now().await;
            transport.hang_up();
        };
        let (result, _) = tokio::join!(call, hang_up);

        assert!(matches!(result, Err(McpError::Closed { .. })));
        assert!(client.is_closed());
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_answers_server_ping() {
        let transport = Arc::new(ScriptedTransport::new(mock_server(vec![])));
        let client = client_for(Arc::clone(&transport));

        transport.inject(serde_json::json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}));
        // A round trip through the reader guarantees the ping was handled first.
        client.list_tools().await.unwrap();

        let reply = transport
            .sent()
            .into_iter()
            .find(|f| f["id"] == "srv-1")
            .expect("ping reply");
        assert_eq!(reply["result"], serde_json::json!({}));
    }
}
