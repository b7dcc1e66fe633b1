//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// No connected client exists for the server id.
    #[error("server '{server_id}' is not connected")]
    NotConnected {
        server_id: String,
    },

    /// The server config names a transport kind we cannot build.
    #[error("unsupported transport '{transport}' for server '{server_id}'")]
    UnsupportedTransport {
        server_id: String,
        transport: String,
    },

    /// A field required by the transport kind is absent.
    #[error("server '{server_id}' is missing required parameter '{parameter}'")]
    MissingParameter {
        server_id: String,
        parameter: String,
    },

    /// The server id cannot be used to build reversible tool names.
    #[error("invalid server id '{server_id}': {reason}")]
    InvalidServerId {
        server_id: String,
        reason: String,
    },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// Framing or I/O failure on the underlying channel.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A request did not complete in time.
    #[error("'{operation}' on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// The channel closed while a request was outstanding.
    #[error("connection to server '{server}' closed")]
    Closed {
        server: String,
    },

    /// Configuration error (bad config file, unknown or duplicate server).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl McpError {
    /// Whether reconnecting the server is the expected recovery.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, McpError::NotConnected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_is_distinguishable() {
        let err = McpError::NotConnected {
            server_id: "files".into(),
        };
        assert!(err.is_not_connected());
        assert_eq!(err.to_string(), "server 'files' is not connected");

        let other = McpError::Closed {
            server: "files".into(),
        };
        assert!(!other.is_not_connected());
    }

    #[test]
    fn test_timeout_display() {
        let err = McpError::Timeout {
            server: "web".into(),
            operation: "tools/call".into(),
            timeout_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "'tools/call' on server 'web' timed out after 1500ms"
        );
    }
}
