//! In-memory transports for tests.
//!
//! A [`ScriptedTransport`] answers each outbound request with whatever its
//! handler returns; a [`ScriptedFactory`] hands them out to the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::McpError;
use super::transport::{Inbound, Transport, TransportFactory, TransportSpec};

/// Scripted reply to one request.
pub enum Reply {
    Result(serde_json::Value),
    Error(i32, String),
    /// Never answer.
    Silent,
}

pub type Handler = Arc<dyn Fn(&str, &serde_json::Value) -> Reply + Send + Sync>;

/// A server that handshakes, lists `tools`, and answers `tools/call` by
/// echoing the arguments as text. Tool `fail` returns `isError`, tool
/// `boom` answers with a JSON-RPC error.
pub fn mock_server(tools: Vec<&str>) -> Handler {
    let tools: Vec<serde_json::Value> = tools
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "name": name,
                "description": format!("{name} tool"),
                "inputSchema": {"type": "object", "properties": {}}
            })
        })
        .collect();

    Arc::new(move |method: &str, params: &serde_json::Value| match method {
        "initialize" => Reply::Result(serde_json::json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-server", "version": "1.0.0"}
        })),
        "tools/list" => Reply::Result(serde_json::json!({ "tools": tools })),
        "prompts/list" => Reply::Result(serde_json::json!({
            "prompts": [{"name": "greet", "arguments": [{"name": "who", "required": true}]}]
        })),
        "prompts/get" => Reply::Result(serde_json::json!({
            "messages": [{"role": "user", "content": {"type": "text", "text": "hello"}}]
        })),
        "resources/list" => Reply::Result(serde_json::json!({
            "resources": [{"uri": "file:///readme.md", "name": "readme"}]
        })),
        "resources/read" => Reply::Result(serde_json::json!({
            "contents": [{"uri": params["uri"], "text": "# readme"}]
        })),
        "tools/call" => match params["name"].as_str() {
            Some("boom") => Reply::Error(-32000, "tool exploded".into()),
            Some("fail") => Reply::Result(serde_json::json!({
                "content": [{"type": "text", "text": "bad input"}],
                "isError": true
            })),
            _ => Reply::Result(serde_json::json!({
                "content": [{"type": "text", "text": params["arguments"].to_string()}]
            })),
        },
        _ => Reply::Error(-32601, format!("unknown method {method}")),
    })
}

// ─── ScriptedTransport ───────────────────────────────────────────────────────

pub struct ScriptedTransport {
    handler: Handler,
    tx: Mutex<Option<mpsc::UnboundedSender<serde_json::Value>>>,
    inbound: Inbound,
    sent: Mutex<Vec<serde_json::Value>>,
    closed: AtomicBool,
    fail_close: bool,
}

impl ScriptedTransport {
    pub fn new(handler: Handler) -> Self {
        let (tx, inbound) = Inbound::channel();
        Self {
            handler,
            tx: Mutex::new(Some(tx)),
            inbound,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_close: false,
        }
    }

    /// Make `close` report an error.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Every frame sent so far.
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Methods of the frames sent so far (requests and notifications).
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|f| f["method"].as_str().map(String::from))
            .collect()
    }

    /// Push a frame as if the server had sent it.
    pub fn inject(&self, frame: serde_json::Value) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// Simulate the server going away (process exit).
    pub fn hang_up(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, frame: serde_json::Value) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::Closed {
                server: "scripted".into(),
            });
        }
        self.sent.lock().unwrap().push(frame.clone());

        let (Some(id), Some(method)) = (frame.get("id"), frame["method"].as_str()) else {
            return Ok(());
        };
        let params = frame.get("params").cloned().unwrap_or(serde_json::Value::Null);
        let response = match (self.handler)(method, &params) {
            Reply::Result(result) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Reply::Error(code, message) => serde_json::json!({
                "jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}
            }),
            Reply::Silent => return Ok(()),
        };
        self.inject(response);
        Ok(())
    }

    async fn recv(&self) -> Option<serde_json::Value> {
        self.inbound.recv().await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.close();
        if self.fail_close {
            return Err(McpError::TransportError {
                server: "scripted".into(),
                reason: "close failed".into(),
            });
        }
        Ok(())
    }
}

// ─── ScriptedFactory ─────────────────────────────────────────────────────────

/// How one server id behaves when opened.
#[derive(Clone)]
pub struct ServerScript {
    pub handler: Handler,
    /// Simulated connection latency before the transport is returned.
    pub open_delay: Duration,
    pub fail_open: Option<String>,
    pub fail_close: bool,
}

impl ServerScript {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            open_delay: Duration::ZERO,
            fail_open: None,
            fail_close: false,
        }
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<String, ServerScript>>,
    opened: Mutex<HashMap<String, Arc<ScriptedTransport>>>,
    opens: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, server_id: &str, script: ServerScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(server_id.to_string(), script);
        self
    }

    /// Number of transports opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// The most recent transport opened for a server.
    pub fn transport(&self, server_id: &str) -> Option<Arc<ScriptedTransport>> {
        self.opened.lock().unwrap().get(server_id).cloned()
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn open(
        &self,
        server_id: &str,
        _spec: &TransportSpec,
    ) -> Result<Arc<dyn Transport>, McpError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(server_id)
            .cloned()
            .unwrap_or_else(|| ServerScript::new(mock_server(vec![])));

        if !script.open_delay.is_zero() {
            tokio::time::sleep(script.open_delay).await;
        }
        if let Some(reason) = script.fail_open {
            return Err(McpError::TransportError {
                server: server_id.to_string(),
                reason,
            });
        }

        let mut transport = ScriptedTransport::new(script.handler);
        if script.fail_close {
            transport = transport.failing_close();
        }
        let transport = Arc::new(transport);
        self.opened
            .lock()
            .unwrap()
            .insert(server_id.to_string(), Arc::clone(&transport));
        Ok(transport)
    }
}
