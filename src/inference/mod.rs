//! Inference Client: OpenAI-compatible API client for the chat model.
//!
//! This module handles all communication with the model endpoint:
//! - Streaming chat completions with tool definitions
//! - SSE stream parsing and tool-call delta accumulation
//! - Model selection from the `models` section of `mcpchat.yaml`
//!
//! The orchestrator only sees the [`LanguageModel`] trait, so tests can
//! script model turns without a server.

pub mod client;
pub mod config;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{InferenceClient, LanguageModel};
pub use config::{ModelConfig, ModelsConfig};
pub use errors::InferenceError;
pub use types::{ChatMessage, ModelReply, Role, StreamChunk, ToolCall, ToolDefinition};
