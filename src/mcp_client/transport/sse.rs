//! Legacy server-push transport.
//!
//! A long-lived `GET` stream carries every inbound frame as a `message`
//! event. The first `endpoint` event names the URL (relative to the stream
//! URL) that outbound frames are `POST`ed to.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT};
use tokio::sync::oneshot;
use url::Url;

use super::{deliver, Inbound, TaskGuard, Transport};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::sse::event_stream;

pub struct SseTransport {
    server_id: String,
    endpoint: Url,
    headers: HeaderMap,
    http: reqwest::Client,
    inbound: Inbound,
    reader: std::sync::Mutex<Option<TaskGuard>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its POST
    /// endpoint. The caller bounds the wait with its handshake timeout.
    pub async fn connect(
        server_id: &str,
        url: Url,
        headers: HeaderMap,
        http: reqwest::Client,
    ) -> Result<Self, McpError> {
        let transport_error = |reason: String| McpError::TransportError {
            server: server_id.to_string(),
            reason,
        };

        let response = http
            .get(url.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| transport_error(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(format!("GET {url} returned HTTP {status}")));
        }

        let (tx, inbound) = Inbound::channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let id = server_id.to_string();
        let reader = TaskGuard::new(tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut events = Box::pin(event_stream(response.bytes_stream()));
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => match event.event_type() {
                        "endpoint" => {
                            if let Some(sender) = endpoint_tx.take() {
                                let _ = sender.send(event.data.trim().to_string());
                            }
                        }
                        "message" => deliver(&id, &tx, &event.data),
                        other => {
                            tracing::debug!(server = %id, event = %other, "ignoring SSE event");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(server = %id, error = %e, "event stream failed");
                        break;
                    }
                }
            }
            tracing::debug!(server = %id, "event stream ended");
        }));

        let path = endpoint_rx
            .await
            .map_err(|_| transport_error("event stream ended before the endpoint event".into()))?;
        let endpoint = url
            .join(&path)
            .map_err(|e| transport_error(format!("invalid endpoint '{path}': {e}")))?;

        tracing::debug!(server = %server_id, endpoint = %endpoint, "received POST endpoint");

        Ok(Self {
            server_id: server_id.to_string(),
            endpoint,
            headers,
            http,
            inbound,
            reader: std::sync::Mutex::new(Some(reader)),
        })
    }

    /// The POST URL announced by the server.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, frame: serde_json::Value) -> Result<(), McpError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(&frame)
            .send()
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_id.clone(),
                reason: format!("POST {} failed: {e}", self.endpoint),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::TransportError {
                server: self.server_id.clone(),
                reason: format!("POST {} returned HTTP {status}", self.endpoint),
            });
        }
        Ok(())
    }

    async fn recv(&self) -> Option<serde_json::Value> {
        self.inbound.recv().await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.inbound.close();
        if let Ok(mut reader) = self.reader.lock() {
            reader.take();
        }
        Ok(())
    }
}
