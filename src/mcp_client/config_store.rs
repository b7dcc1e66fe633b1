//! Persistent server definitions.
//!
//! A JSON file of the shape `{"servers": [ServerConfig, ...]}`. The store
//! keeps an in-memory copy and rewrites the file atomically (temp file +
//! rename) on every change. A missing file reads as an empty list.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::errors::McpError;
use super::naming::validate_server_id;
use super::types::ServerConfig;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

/// File-backed list of registered servers.
pub struct ServerConfigStore {
    path: PathBuf,
    servers: Mutex<Vec<ServerConfig>>,
}

impl ServerConfigStore {
    /// Load the store from `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, McpError> {
        let path = path.into();
        let servers = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let file: ServersFile =
                    serde_json::from_str(&content).map_err(|e| McpError::ConfigError {
                        reason: format!("failed to parse {}: {e}", path.display()),
                    })?;
                file.servers
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(McpError::ConfigError {
                    reason: format!("failed to read {}: {e}", path.display()),
                })
            }
        };

        tracing::debug!(path = %path.display(), count = servers.len(), "loaded server configs");
        Ok(Self {
            path,
            servers: Mutex::new(servers),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All server definitions, in file order.
    pub fn list(&self) -> Vec<ServerConfig> {
        self.lock().clone()
    }

    pub fn get(&self, server_id: &str) -> Option<ServerConfig> {
        self.lock().iter().find(|s| s.id == server_id).cloned()
    }

    /// Register a new server. Fails on an invalid or duplicate id.
    pub fn add(&self, config: ServerConfig) -> Result<(), McpError> {
        validate_server_id(&config.id)?;

        let mut servers = self.lock();
        if servers.iter().any(|s| s.id == config.id) {
            return Err(McpError::ConfigError {
                reason: format!("server '{}' already exists", config.id),
            });
        }
        let mut next = servers.clone();
        next.push(config);
        self.persist(&next)?;
        *servers = next;
        Ok(())
    }

    /// Replace the definition with the same id.
    pub fn update(&self, config: ServerConfig) -> Result<(), McpError> {
        let mut servers = self.lock();
        let index = servers
            .iter()
            .position(|s| s.id == config.id)
            .ok_or_else(|| unknown(&config.id))?;
        let mut next = servers.clone();
        next[index] = config;
        self.persist(&next)?;
        *servers = next;
        Ok(())
    }

    /// Remove a server and return its last definition.
    pub fn remove(&self, server_id: &str) -> Result<ServerConfig, McpError> {
        let mut servers = self.lock();
        let index = servers
            .iter()
            .position(|s| s.id == server_id)
            .ok_or_else(|| unknown(server_id))?;
        let mut next = servers.clone();
        let removed = next.remove(index);
        self.persist(&next)?;
        *servers = next;
        Ok(removed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ServerConfig>> {
        self.servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, servers: &[ServerConfig]) -> Result<(), McpError> {
        let write_err = |e: String| McpError::ConfigError {
            reason: format!("failed to write {}: {e}", self.path.display()),
        };

        let content = serde_json::to_string_pretty(&ServersFile {
            servers: servers.to_vec(),
        })
        .map_err(|e| write_err(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }

        // Write to temp file, then rename for atomicity
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| write_err(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| write_err(e.to_string()))?;

        tracing::debug!(count = servers.len(), "saved server configs");
        Ok(())
    }
}

fn unknown(server_id: &str) -> McpError {
    McpError::ConfigError {
        reason: format!("unknown server '{server_id}'"),
    }
}
