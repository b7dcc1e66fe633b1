//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Blob upload or local file write failed.
    #[error("storage error: {reason}")]
    StorageError { reason: String },

    /// The model call failed. Fatal to the turn.
    #[error("model request failed: {0}")]
    ModelError(#[from] InferenceError),

    /// The model named a tool whose server prefix is not in the catalog.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// Structural argument check failed before dispatch.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Tool execution error (wraps McpError or an `isError` result).
    #[error("{reason}")]
    ToolExecutionError { reason: String },

    /// The model kept requesting tools past the configured limit.
    #[error("tool-call round limit ({max_rounds}) reached")]
    RoundLimit { max_rounds: usize },

    /// The caller went away mid-turn.
    #[error("request cancelled")]
    Cancelled,

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

impl From<McpError> for AgentError {
    fn from(e: McpError) -> Self {
        AgentError::ToolExecutionError {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::StorageError {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_messages() {
        assert_eq!(
            AgentError::RoundLimit { max_rounds: 10 }.to_string(),
            "tool-call round limit (10) reached"
        );
        assert_eq!(AgentError::Cancelled.to_string(), "request cancelled");
    }

    #[test]
    fn test_mcp_error_keeps_message() {
        let err: AgentError = McpError::NotConnected {
            server_id: "files".into(),
        }
        .into();
        assert!(matches!(err, AgentError::ToolExecutionError { .. }));
        assert!(err.to_string().contains("files"));
    }
}
