//! Agent Core: the tool-calling conversation layer.
//!
//! Submodules:
//! - `orchestrator`: the per-turn state machine (model rounds + tool calls)
//! - `catalog`: tools of the connected servers, as offered to the model
//! - `events`: typed progress events and their push-stream frames
//! - `history`: conversation history collaborator (SQLite)
//! - `storage`: binary upload collaborator (local directory)
//! - `types`: shared types across the agent core
//! - `errors`: agent-level error types

pub mod catalog;
pub mod errors;
pub mod events;
pub mod history;
pub mod orchestrator;
pub mod storage;
pub mod types;

// Re-exports for convenience
pub use catalog::ToolCatalog;
pub use errors::AgentError;
pub use events::{event_channel, frames, AgentEvent, EventEmitter, EventStream};
pub use history::{HistoryStore, SqliteHistory};
pub use orchestrator::{Orchestrator, OrchestratorOptions, TurnOutcome};
pub use storage::{BlobStorage, LocalBlobStorage};
pub use types::{
    Attachment, StoredMessage, ToolCallRecord, ToolCallStatus, TurnRequest, UploadedImage,
};
