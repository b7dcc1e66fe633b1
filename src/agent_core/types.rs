//! Shared types for the agent core.
//!
//! Turn inputs, stored history rows, and the per-turn tool call records
//! used across the orchestrator, history store and blob storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::types::Role;

// ─── Turn Input ─────────────────────────────────────────────────────────────

/// One user request to the orchestrator.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    /// The user's new message.
    pub message: String,
    /// Binary parts attached to the message (images are forwarded to the model).
    pub attachments: Vec<Attachment>,
    /// Target for binary uploads. Without it, tool binaries are not uploaded.
    pub assistant_message_id: Option<String>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            attachments: Vec::new(),
            assistant_message_id: None,
        }
    }
}

/// Raw bytes attached to a user message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub mime_type: String,
}

// ─── Conversation Messages ──────────────────────────────────────────────────

/// A single message stored in conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Auto-incremented row ID (set by DB on insert).
    pub id: i64,
    pub session_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    pub role: Role,
    pub content: String,
}

/// Metadata for a conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: String,
    pub last_activity: String,
    pub message_count: usize,
}

// ─── Tool Calls ─────────────────────────────────────────────────────────────

/// Lifecycle of one dispatched tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Completed,
    Error,
}

/// A binary tool output after upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub url: String,
    pub mime_type: String,
}

/// One tool invocation as seen by the orchestrator, scoped to a turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// Fresh per-dispatch id, used in events.
    pub id: String,
    pub server_id: String,
    pub server_name: String,
    /// Unprefixed tool name.
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub images: Vec<UploadedImage>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolCallRecord {
    pub fn pending(
        id: impl Into<String>,
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            server_id: server_id.into(),
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            images: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ToolCallStatus::Executing;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: serde_json::Value, images: Vec<UploadedImage>) {
        self.status = ToolCallStatus::Completed;
        self.result = Some(result);
        self.images = images;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ToolCallStatus::Error;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}
