//! MCP Client: connections to tool servers over stdio, HTTP and SSE.
//!
//! This module handles:
//! - Transport adapters (subprocess pipe, streamable HTTP, server push)
//! - JSON-RPC 2.0 request correlation and the MCP handshake
//! - The connection registry: per-server lifecycle, discovery, tool calls
//! - Normalizing tool results into text plus binary items
//! - Persisting server definitions
//!
//! The registry is used by the orchestrator to dispatch tool calls chosen
//! by the language model.

pub mod client;
pub mod config_store;
pub mod errors;
pub mod naming;
pub mod normalize;
pub mod registry;
pub mod sse;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::ProtocolClient;
pub use config_store::ServerConfigStore;
pub use errors::McpError;
pub use naming::{prefix_tool_name, unprefix_tool_name, TOOL_NAME_SEPARATOR};
pub use registry::{ConnectionRegistry, RegistryOptions};
pub use transport::{DefaultTransportFactory, Transport, TransportFactory, TransportSpec};
pub use types::{
    BinaryItem, CallResult, ConnectionState, ConnectionStatus, ServerConfig, ToolDescriptor,
};
