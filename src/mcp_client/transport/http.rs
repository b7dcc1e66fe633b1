//! Streamable HTTP transport.
//!
//! Every outbound frame is a `POST` to the server URL. The reply is either a
//! single JSON body or an SSE stream of frames; both end up on the inbound
//! queue. The `Mcp-Session-Id` header from the server is echoed on every
//! later request, and a best-effort `DELETE` ends the session on close.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use url::Url;

use super::{deliver, Inbound, TaskGuard, Transport};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::sse::event_stream;

/// Session header defined by the streamable HTTP transport.
const SESSION_HEADER: &str = "mcp-session-id";

/// Maximum body excerpt included in HTTP error messages.
const MAX_ERROR_BODY_CHARS: usize = 300;

pub struct HttpStreamTransport {
    server_id: String,
    url: Url,
    headers: HeaderMap,
    http: reqwest::Client,
    session_id: std::sync::Mutex<Option<String>>,
    tx: mpsc::UnboundedSender<serde_json::Value>,
    inbound: Inbound,
    /// Readers for responses that arrived as event streams.
    readers: std::sync::Mutex<Vec<TaskGuard>>,
}

impl HttpStreamTransport {
    /// No request is made until the first frame is sent.
    pub fn new(server_id: &str, url: Url, headers: HeaderMap, http: reqwest::Client) -> Self {
        let (tx, inbound) = Inbound::channel();
        Self {
            server_id: server_id.to_string(),
            url,
            headers,
            http,
            session_id: std::sync::Mutex::new(None),
            tx,
            inbound,
            readers: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_id.clone(),
            reason,
        }
    }

    fn spawn_stream_reader(&self, response: reqwest::Response) {
        let tx = self.tx.clone();
        let id = self.server_id.clone();
        let handle = tokio::spawn(async move {
            let mut events = Box::pin(event_stream(response.bytes_stream()));
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event_type() == "message" => deliver(&id, &tx, &event.data),
                    Ok(event) => {
                        tracing::debug!(server = %id, event = %event.event_type(), "ignoring SSE event");
                    }
                    Err(e) => {
                        tracing::warn!(server = %id, error = %e, "response stream failed");
                        break;
                    }
                }
            }
        });

        if let Ok(mut readers) = self.readers.lock() {
            readers.retain(|r| !r.is_finished());
            readers.push(TaskGuard::new(handle));
        }
    }
}

#[async_trait]
impl Transport for HttpStreamTransport {
    async fn send(&self, frame: serde_json::Value) -> Result<(), McpError> {
        let mut request = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&frame);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(format!("POST {} failed: {e}", self.url)))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                if slot.as_deref() != Some(session) {
                    tracing::debug!(server = %self.server_id, session = %session, "session established");
                    *slot = Some(session.to_string());
                }
            }
        }

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(self.transport_error(format!("HTTP {status}: {excerpt}")));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            self.spawn_stream_reader(response);
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| self.transport_error(format!("failed to read response body: {e}")))?;
            deliver(&self.server_id, &self.tx, &body);
        }
        Ok(())
    }

    async fn recv(&self) -> Option<serde_json::Value> {
        self.inbound.recv().await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.inbound.close();
        if let Ok(mut readers) = self.readers.lock() {
            readers.clear();
        }

        let Some(session) = self.session_id() else {
            return Ok(());
        };
        let result = self
            .http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(server = %self.server_id, error = %e, "session DELETE failed");
        }
        Ok(())
    }
}
