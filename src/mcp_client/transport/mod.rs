//! Transport adapters.
//!
//! Each adapter opens one framed, bidirectional channel to a server and
//! exposes it through the [`Transport`] trait: send a frame, receive a
//! frame, close. Message-level semantics live in the protocol client.
//!
//! Three kinds are supported, selected by [`TransportSpec`]:
//! - `stdio`: subprocess with newline-delimited JSON over stdin/stdout
//! - `http`: streamable HTTP (POST per frame, JSON or SSE responses)
//! - `sse`: legacy server-push stream plus a POST endpoint

mod http;
mod sse;
mod stdio;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::errors::McpError;
use super::types::{transport_kinds, ServerConfig};

pub use http::HttpStreamTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Connect timeout for HTTP-based transports.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// One bidirectional, message-framed channel to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one outbound JSON-RPC frame.
    async fn send(&self, frame: serde_json::Value) -> Result<(), McpError>;

    /// Receive the next inbound frame. `None` once the channel has ended.
    async fn recv(&self) -> Option<serde_json::Value>;

    /// Close the channel. Outstanding and later `recv` calls yield `None`.
    async fn close(&self) -> Result<(), McpError>;
}

// ─── Transport Spec ──────────────────────────────────────────────────────────

/// Validated transport parameters, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    },
    HttpStream {
        url: Url,
        headers: HashMap<String, String>,
    },
    Sse {
        url: Url,
        headers: HashMap<String, String>,
    },
}

impl TransportSpec {
    /// Validate a server config into a transport spec.
    ///
    /// Fails with `UnsupportedTransport` for an unknown kind and
    /// `MissingParameter` when `command` (stdio) or `url` (http, sse) is absent.
    pub fn from_config(config: &ServerConfig) -> Result<Self, McpError> {
        let missing = |parameter: &str| McpError::MissingParameter {
            server_id: config.id.clone(),
            parameter: parameter.to_string(),
        };

        match config.transport.as_str() {
            transport_kinds::STDIO => {
                let command = config
                    .command
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| missing("command"))?;
                Ok(Self::Stdio {
                    command: command.to_string(),
                    args: config.args.clone(),
                    env: config.env.clone(),
                    cwd: config.cwd.clone(),
                })
            }
            kind @ (transport_kinds::HTTP | transport_kinds::SSE) => {
                let raw = config
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| missing("url"))?;
                let url = Url::parse(raw).map_err(|e| McpError::ConfigError {
                    reason: format!("server '{}' has an invalid url '{raw}': {e}", config.id),
                })?;
                let headers = config.headers.clone();
                if kind == transport_kinds::HTTP {
                    Ok(Self::HttpStream { url, headers })
                } else {
                    Ok(Self::Sse { url, headers })
                }
            }
            other => Err(McpError::UnsupportedTransport {
                server_id: config.id.clone(),
                transport: other.to_string(),
            }),
        }
    }

    /// Kind name, as used in server configs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => transport_kinds::STDIO,
            Self::HttpStream { .. } => transport_kinds::HTTP,
            Self::Sse { .. } => transport_kinds::SSE,
        }
    }
}

// ─── Factory ─────────────────────────────────────────────────────────────────

/// Opens transports for the registry. Tests substitute scripted channels.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        server_id: &str,
        spec: &TransportSpec,
    ) -> Result<Arc<dyn Transport>, McpError>;
}

/// Factory for the real subprocess and HTTP transports.
pub struct DefaultTransportFactory {
    http: reqwest::Client,
}

impl DefaultTransportFactory {
    pub fn new() -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| McpError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(
        &self,
        server_id: &str,
        spec: &TransportSpec,
    ) -> Result<Arc<dyn Transport>, McpError> {
        match spec {
            TransportSpec::Stdio {
                command,
                args,
                env,
                cwd,
            } => Ok(Arc::new(StdioTransport::spawn(
                server_id,
                command,
                args,
                env,
                cwd.as_deref(),
            )?)),
            TransportSpec::HttpStream { url, headers } => Ok(Arc::new(HttpStreamTransport::new(
                server_id,
                url.clone(),
                header_map(server_id, headers)?,
                self.http.clone(),
            ))),
            TransportSpec::Sse { url, headers } => Ok(Arc::new(
                SseTransport::connect(
                    server_id,
                    url.clone(),
                    header_map(server_id, headers)?,
                    self.http.clone(),
                )
                .await?,
            )),
        }
    }
}

// ─── Shared Plumbing ─────────────────────────────────────────────────────────

/// Receive side shared by every adapter: an inbound queue plus a close signal.
pub(crate) struct Inbound {
    rx: Mutex<mpsc::UnboundedReceiver<serde_json::Value>>,
    closed: CancellationToken,
}

impl Inbound {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<serde_json::Value>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inbound = Self {
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        };
        (tx, inbound)
    }

    pub(crate) async fn recv(&self) -> Option<serde_json::Value> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = rx.recv() => frame,
        }
    }

    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}

/// Aborts a background reader when dropped.
pub(crate) struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Convert configured static headers into a `HeaderMap`.
fn header_map(server_id: &str, headers: &HashMap<String, String>) -> Result<HeaderMap, McpError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let invalid = |e: String| McpError::ConfigError {
            reason: format!("server '{server_id}' has an invalid header '{name}': {e}"),
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Push a decoded JSON body (single frame or batch) onto the inbound queue.
pub(crate) fn deliver(
    server_id: &str,
    tx: &mpsc::UnboundedSender<serde_json::Value>,
    body: &str,
) {
    let body = body.trim();
    if body.is_empty() {
        return;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(frames)) => {
            for frame in frames {
                let _ = tx.send(frame);
            }
        }
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(e) => {
            tracing::debug!(server = %server_id, error = %e, "dropping non-JSON frame");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_stdio_config() {
        let config = ServerConfig::stdio("files", "Files", "npx", &["-y", "server"]);
        let spec = TransportSpec::from_config(&config).unwrap();
        assert_eq!(spec.kind(), "stdio");
        match spec {
            TransportSpec::Stdio { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args, vec!["-y", "server"]);
            }
            other => panic!("expected stdio, got {other:?}"),
        }
    }

    #[test]
    fn test_spec_from_remote_configs() {
        let http = ServerConfig::remote("web", "Web", "http", "http://localhost:8931/mcp");
        assert!(matches!(
            TransportSpec::from_config(&http).unwrap(),
            TransportSpec::HttpStream { .. }
        ));

        let sse = ServerConfig::remote("push", "Push", "sse", "http://localhost:8931/sse");
        assert!(matches!(
            TransportSpec::from_config(&sse).unwrap(),
            TransportSpec::Sse { .. }
        ));
    }

    #[test]
    fn test_spec_unsupported_transport() {
        let config = ServerConfig::remote("ws", "WS", "websocket", "ws://localhost");
        let err = TransportSpec::from_config(&config).unwrap_err();
        match err {
            McpError::UnsupportedTransport { transport, .. } => assert_eq!(transport, "websocket"),
            other => panic!("expected UnsupportedTransport, got {other:?}"),
        }
    }

    #[test]
    fn test_spec_missing_parameters() {
        let mut stdio = ServerConfig::stdio("files", "Files", "  ", &[]);
        let err = TransportSpec::from_config(&stdio).unwrap_err();
        assert!(matches!(err, McpError::MissingParameter { ref parameter, .. } if parameter == "command"));

        stdio.command = None;
        assert!(TransportSpec::from_config(&stdio).is_err());

        let mut http = ServerConfig::remote("web", "Web", "http", "http://x");
        http.url = None;
        let err = TransportSpec::from_config(&http).unwrap_err();
        assert!(matches!(err, McpError::MissingParameter { ref parameter, .. } if parameter == "url"));
    }

    #[test]
    fn test_spec_invalid_url() {
        let config = ServerConfig::remote("web", "Web", "sse", "not a url");
        assert!(matches!(
            TransportSpec::from_config(&config),
            Err(McpError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_header_map_rejects_bad_values() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        assert_eq!(header_map("web", &headers).unwrap().len(), 1);

        headers.insert("bad header".to_string(), "x".to_string());
        assert!(header_map("web", &headers).is_err());
    }

    #[tokio::test]
    async fn test_inbound_close_ends_recv() {
        let (tx, inbound) = Inbound::channel();
        tx.send(serde_json::json!({"id": 1})).unwrap();
        assert!(inbound.recv().await.is_some());
        inbound.close();
        tx.send(serde_json::json!({"id": 2})).unwrap();
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_deliver_handles_batches() {
        let (tx, inbound) = Inbound::channel();
        deliver("web", &tx, r#"[{"id":1},{"id":2}]"#);
        deliver("web", &tx, "   ");
        deliver("web", &tx, "not json");
        deliver("web", &tx, r#"{"id":3}"#);
        drop(tx);
        let mut ids = Vec::new();
        while let Some(frame) = inbound.recv().await {
            ids.push(frame["id"].as_u64().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
