//! Subprocess transport: newline-delimited JSON over a child's stdio.
//!
//! Stdout lines that do not parse as JSON are skipped (many servers log to
//! stdout). Stderr is forwarded line by line to `tracing::debug!`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use super::{Inbound, Transport};
use crate::mcp_client::errors::McpError;

/// Grace period between closing stdin and killing the process.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running server process with its stdin as the outbound side.
pub struct StdioTransport {
    server_id: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    inbound: Inbound,
}

impl StdioTransport {
    /// Spawn the server process and start its stdout/stderr readers.
    pub fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args).envs(env);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: server_id.to_string(),
            reason: format!("{command}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: server_id.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: server_id.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let (tx, inbound) = Inbound::channel();

        let id = server_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(trimmed) {
                            Ok(frame) => {
                                if tx.send(frame).is_err() {
                                    break;
                                }
                            }
                            Err(_) => {
                                tracing::debug!(server = %id, line = %trimmed, "skipping non-JSON stdout line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(server = %id, error = %e, "stdout read failed");
                        break;
                    }
                }
            }
            tracing::debug!(server = %id, "server stdout closed");
        });

        if let Some(stderr) = child.stderr.take() {
            let id = server_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %id, "stderr: {line}");
                }
            });
        }

        tracing::info!(server = %server_id, command = %command, pid = ?child.id(), "spawned server process");

        Ok(Self {
            server_id: server_id.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            inbound,
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, frame: serde_json::Value) -> Result<(), McpError> {
        let mut line = serde_json::to_string(&frame).map_err(|e| McpError::TransportError {
            server: self.server_id.clone(),
            reason: format!("failed to serialize frame: {e}"),
        })?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| McpError::Closed {
            server: self.server_id.clone(),
        })?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_id.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        stdin.flush().await.map_err(|e| McpError::TransportError {
            server: self.server_id.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    async fn recv(&self) -> Option<serde_json::Value> {
        self.inbound.recv().await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.inbound.close();
        // Dropping stdin sends EOF, which is the stdio shutdown signal.
        drop(self.stdin.lock().await.take());

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server_id, %status, "server process exited");
                Ok(())
            }
            _ => {
                tracing::debug!(server = %self.server_id, "server did not exit after EOF, killing");
                child.kill().await.map_err(|e| McpError::TransportError {
                    server: self.server_id.clone(),
                    reason: format!("failed to kill process: {e}"),
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_round_trip_skips_non_json() {
        // `cat` echoes every frame back; the shell prints a log line first.
        let transport = StdioTransport::spawn(
            "echo",
            "sh",
            &["-c".to_string(), "echo 'booting...'; exec cat".to_string()],
            &HashMap::new(),
            None,
        )
        .unwrap();

        transport
            .send(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
            .await
            .unwrap();
        let frame = transport.recv().await.unwrap();
        assert_eq!(frame["id"], 1);

        transport.close().await.unwrap();
        assert!(transport.recv().await.is_none());
        assert!(matches!(
            transport.send(serde_json::json!({})).await,
            Err(McpError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_exit_ends_recv() {
        let transport = StdioTransport::spawn(
            "short",
            "sh",
            &["-c".to_string(), "exit 0".to_string()],
            &HashMap::new(),
            None,
        )
        .unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = StdioTransport::spawn(
            "missing",
            "definitely-not-a-real-binary-xyz",
            &[],
            &HashMap::new(),
            None,
        );
        assert!(matches!(result, Err(McpError::SpawnFailed { .. })));
    }
}
