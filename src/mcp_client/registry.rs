//! Connection registry.
//!
//! Maps server ids to live protocol clients and owns their lifecycle:
//! connect (with handshake), disconnect, discovery and call dispatch.
//!
//! Locking: connect/disconnect of one id are serialized by a per-id async
//! mutex, so two ids never wait on each other. The entry map itself sits
//! behind a synchronous `RwLock` that is never held across an `.await`,
//! which keeps state reads non-blocking while handshakes are in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::client::{ProtocolClient, DEFAULT_CALL_TIMEOUT_MS};
use super::errors::McpError;
use super::naming::validate_server_id;
use super::normalize::normalize_call_result;
use super::transport::{TransportFactory, TransportSpec};
use super::types::{
    CallResult, ConnectionState, ConnectionStatus, PromptDescriptor, PromptResult,
    ResourceContents, ResourceDescriptor, ServerConfig, ServerInfo, ToolDescriptor,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for transport setup plus the initialize handshake.
///
/// Generous so that servers importing large runtimes at startup still make it.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts applied by the registry.
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

struct Entry {
    state: ConnectionState,
    config: ServerConfig,
    client: Option<Arc<ProtocolClient>>,
}

impl Entry {
    /// A connected entry whose channel has since ended reads as disconnected.
    fn effective_state(&self) -> ConnectionState {
        match &self.client {
            Some(client) if self.state.is_connected() && client.is_closed() => {
                ConnectionState::disconnected(&self.state.server_id)
            }
            _ => self.state.clone(),
        }
    }

    fn live_client(&self) -> Option<Arc<ProtocolClient>> {
        match &self.client {
            Some(client) if self.state.is_connected() && !client.is_closed() => {
                Some(Arc::clone(client))
            }
            _ => None,
        }
    }
}

// ─── ConnectionRegistry ──────────────────────────────────────────────────────

/// Process-wide set of server connections, constructed explicitly and shared
/// by reference (typically behind an `Arc`).
pub struct ConnectionRegistry {
    factory: Arc<dyn TransportFactory>,
    options: RegistryOptions,
    entries: RwLock<HashMap<String, Entry>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn TransportFactory>, options: RegistryOptions) -> Self {
        Self {
            factory,
            options,
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect a server. Never fails: problems are reported through the
    /// returned state (`status = error`).
    ///
    /// Idempotent for an already connected id. A stale entry (error, or a
    /// connection whose channel ended) is torn down first.
    pub async fn connect(&self, config: &ServerConfig) -> ConnectionState {
        let server_id = config.id.as_str();
        if let Err(e) = validate_server_id(server_id) {
            tracing::warn!(server = %server_id, error = %e, "refusing to connect");
            return ConnectionState::failed(server_id, e.to_string());
        }

        let lock = self.lock_for(server_id);
        let _guard = lock.lock().await;

        let existing = self.read_entry(server_id, |entry| {
            (entry.live_client().is_some(), entry.state.clone())
        });
        match existing {
            Some((true, state)) => {
                tracing::debug!(server = %server_id, "already connected");
                return state;
            }
            Some((false, _)) => self.remove_and_close(server_id).await,
            None => {}
        }

        self.write_entries(|entries| {
            entries.insert(
                server_id.to_string(),
                Entry {
                    state: ConnectionState::connecting(server_id),
                    config: config.clone(),
                    client: None,
                },
            );
        });

        tracing::info!(server = %server_id, transport = %config.transport, "connecting");
        let start = Instant::now();

        let outcome =
            match tokio::time::timeout(self.options.handshake_timeout, self.open_client(config))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(McpError::Timeout {
                    server: server_id.to_string(),
                    operation: "initialize".into(),
                    timeout_ms: self.options.handshake_timeout.as_millis() as u64,
                }),
            };

        let (state, client) = match outcome {
            Ok(client) => {
                tracing::info!(
                    server = %server_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "connected"
                );
                (ConnectionState::connected(server_id), Some(client))
            }
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "connection failed");
                (ConnectionState::failed(server_id, e.to_string()), None)
            }
        };

        self.write_entries(|entries| {
            entries.insert(
                server_id.to_string(),
                Entry {
                    state: state.clone(),
                    config: config.clone(),
                    client,
                },
            );
        });
        state
    }

    async fn open_client(&self, config: &ServerConfig) -> Result<Arc<ProtocolClient>, McpError> {
        let spec = TransportSpec::from_config(config)?;
        let transport = self.factory.open(&config.id, &spec).await?;
        let client = ProtocolClient::new(&config.id, transport, self.options.call_timeout);

        if let Err(e) = client.initialize().await {
            if let Err(close_err) = client.close().await {
                tracing::debug!(server = %config.id, error = %close_err, "close after failed handshake");
            }
            return Err(e);
        }
        Ok(Arc::new(client))
    }

    /// Connect several servers concurrently. States are returned in input order.
    pub async fn connect_all(&self, configs: &[ServerConfig]) -> Vec<ConnectionState> {
        futures::future::join_all(configs.iter().map(|config| self.connect(config))).await
    }

    /// Disconnect a server. No-op when the id is unknown.
    pub async fn disconnect(&self, server_id: &str) {
        let lock = self.lock_for(server_id);
        {
            let _guard = lock.lock().await;
            self.remove_and_close(server_id).await;
        }
        self.release_lock(server_id, lock);
    }

    /// Disconnect every registered server concurrently.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.read_entries(|entries| entries.keys().cloned().collect());
        futures::future::join_all(ids.iter().map(|id| self.disconnect(id))).await;
        tracing::info!(count = ids.len(), "all servers disconnected");
    }

    /// Remove the entry first, then close its client. Close errors are logged.
    async fn remove_and_close(&self, server_id: &str) {
        let removed = self.write_entries(|entries| entries.remove(server_id));
        let Some(entry) = removed else {
            return;
        };

        if let Some(client) = entry.client {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %server_id, error = %e, "error while closing connection");
            }
        }
        tracing::info!(server = %server_id, "disconnected");
    }

    // ─── State ───────────────────────────────────────────────────────────

    /// Current state of a server; `disconnected` for unknown ids.
    pub fn get_connection_state(&self, server_id: &str) -> ConnectionState {
        self.read_entry(server_id, Entry::effective_state)
            .unwrap_or_else(|| ConnectionState::disconnected(server_id))
    }

    /// Snapshot of every known server's state, in no particular order.
    pub fn list_states(&self) -> Vec<ConnectionState> {
        self.read_entries(|entries| entries.values().map(Entry::effective_state).collect())
    }

    /// Ids of servers whose status is `connected`, in no particular order.
    pub fn get_connected_server_ids(&self) -> Vec<String> {
        self.read_entries(|entries| {
            entries
                .iter()
                .filter(|(_, entry)| entry.effective_state().status == ConnectionStatus::Connected)
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    /// The config a server was last connected with.
    pub fn server_config(&self, server_id: &str) -> Option<ServerConfig> {
        self.read_entry(server_id, |entry| entry.config.clone())
    }

    /// Remote identity reported by a connected server.
    pub fn server_info(&self, server_id: &str) -> Option<ServerInfo> {
        self.connected_client(server_id).ok()?.server_info()
    }

    // ─── Capabilities ────────────────────────────────────────────────────

    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDescriptor>, McpError> {
        self.connected_client(server_id)?.list_tools().await
    }

    pub async fn list_prompts(&self, server_id: &str) -> Result<Vec<PromptDescriptor>, McpError> {
        self.connected_client(server_id)?.list_prompts().await
    }

    pub async fn list_resources(
        &self,
        server_id: &str,
    ) -> Result<Vec<ResourceDescriptor>, McpError> {
        self.connected_client(server_id)?.list_resources().await
    }

    /// Invoke a tool and normalize its result.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallResult, McpError> {
        let client = self.connected_client(server_id)?;
        let start = Instant::now();

        let raw = client.call_tool(tool_name, arguments).await?;
        let result = normalize_call_result(raw);

        tracing::debug!(
            server = %server_id,
            tool = %tool_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            binary_items = result.binary_items.len(),
            is_error = result.is_error,
            "tool call complete"
        );
        Ok(result)
    }

    pub async fn get_prompt(
        &self,
        server_id: &str,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptResult, McpError> {
        self.connected_client(server_id)?
            .get_prompt(name, arguments)
            .await
    }

    pub async fn read_resource(
        &self,
        server_id: &str,
        uri: &str,
    ) -> Result<ResourceContents, McpError> {
        self.connected_client(server_id)?.read_resource(uri).await
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn connected_client(&self, server_id: &str) -> Result<Arc<ProtocolClient>, McpError> {
        self.read_entry(server_id, Entry::live_client)
            .flatten()
            .ok_or_else(|| McpError::NotConnected {
                server_id: server_id.to_string(),
            })
    }

    fn lock_for(&self, server_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(server_id.to_string()).or_default())
    }

    /// Forget the per-id lock once the id has no entry and nobody else
    /// holds or waits on it.
    fn release_lock(&self, server_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one in `lock`.
        let unused = Arc::strong_count(&lock) == 2;
        if unused && !self.read_entries(|entries| entries.contains_key(server_id)) {
            locks.remove(server_id);
        }
    }

    fn read_entries<T>(&self, f: impl FnOnce(&HashMap<String, Entry>) -> T) -> T {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&entries)
    }

    fn read_entry<T>(&self, server_id: &str, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        self.read_entries(|entries| entries.get(server_id).map(f))
    }

    fn write_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut entries)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
