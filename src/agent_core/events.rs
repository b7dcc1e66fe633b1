//! Event emitter for one orchestration turn.
//!
//! Events go out over an unbounded channel as they happen and are rendered
//! as push-stream frames: `event: <type>\ndata: <json>\n\n`. `done` and
//! `error` are terminal: once one has been emitted, later events are dropped.

use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::types::UploadedImage;

// ─── Events ─────────────────────────────────────────────────────────────────

/// One orchestrator progress event. Serializes to the frame payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentEvent {
    /// Final answer text.
    Text { content: String },

    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        id: String,
        server_id: String,
        server_name: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolCallResult {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        images: Option<Vec<UploadedImage>>,
    },

    Error { message: String },

    Done {},
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::Text { .. } => "text",
            AgentEvent::ToolCallStart { .. } => "tool_call_start",
            AgentEvent::ToolCallResult { .. } => "tool_call_result",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Done {} => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Error { .. } | AgentEvent::Done {})
    }

    /// Render as one push-stream frame.
    pub fn to_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize event");
            "{}".to_string()
        });
        format!("event: {}\ndata: {data}\n\n", self.event_type())
    }
}

// ─── Emitter ────────────────────────────────────────────────────────────────

/// Sending half, owned by the orchestrator for the duration of a turn.
#[derive(Debug)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<AgentEvent>,
    finished: bool,
}

/// Receiving half, handed to the presentation layer.
pub type EventStream = UnboundedReceiverStream<AgentEvent>;

/// Create a connected emitter / stream pair.
pub fn event_channel() -> (EventEmitter, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventEmitter {
            tx,
            finished: false,
        },
        UnboundedReceiverStream::new(rx),
    )
}

impl EventEmitter {
    pub fn emit(&mut self, event: AgentEvent) {
        if self.finished {
            tracing::warn!(event = event.event_type(), "event after terminal frame dropped");
            return;
        }
        self.finished = event.is_terminal();
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    /// A terminal event has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The presentation layer stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the presentation layer stops listening.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Render a stream of events as frames.
pub fn frames<S>(events: S) -> impl Stream<Item = String>
where
    S: Stream<Item = AgentEvent>,
{
    events.map(|event| event.to_frame())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_format() {
        let frame = AgentEvent::Text {
            content: "hi\nthere".into(),
        }
        .to_frame();
        assert_eq!(frame, "event: text\ndata: {\"content\":\"hi\\nthere\"}\n\n");
        assert_eq!(AgentEvent::Done {}.to_frame(), "event: done\ndata: {}\n\n");
    }

    #[test]
    fn test_payload_shapes() {
        let start = AgentEvent::ToolCallStart {
            id: "c1".into(),
            server_id: "files".into(),
            server_name: "Files".into(),
            name: "read".into(),
            arguments: serde_json::json!({"path": "/a"}),
        };
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["serverId"], "files");
        assert_eq!(json["serverName"], "Files");
        assert_eq!(json["name"], "read");

        let failed = AgentEvent::ToolCallResult {
            id: "c1".into(),
            result: None,
            error: Some("boom".into()),
            images: None,
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"id": "c1", "error": "boom"})
        );

        let with_images = AgentEvent::ToolCallResult {
            id: "c2".into(),
            result: Some(serde_json::json!({"content": []})),
            error: None,
            images: Some(vec![UploadedImage {
                url: "http://x/a.png".into(),
                mime_type: "image/png".into(),
            }]),
        };
        let json = serde_json::to_value(&with_images).unwrap();
        assert_eq!(json["images"][0]["mimeType"], "image/png");
    }

    #[tokio::test]
    async fn test_nothing_after_terminal_event() {
        let (mut emitter, stream) = event_channel();
        emitter.emit(AgentEvent::Error {
            message: "bad".into(),
        });
        emitter.emit(AgentEvent::Done {});
        assert!(emitter.is_finished());
        drop(emitter);

        let collected: Vec<String> = frames(stream).collect().await;
        assert_eq!(collected.len(), 1);
        assert!(collected[0].starts_with("event: error\n"));
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_harmless() {
        let (mut emitter, stream) = event_channel();
        drop(stream);
        assert!(emitter.is_closed());
        emitter.emit(AgentEvent::Done {});
        assert!(emitter.is_finished());
    }
}
