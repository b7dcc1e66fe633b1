//! Tool-calling orchestrator.
//!
//! Drives one conversation turn as an explicit state machine:
//!
//! ```text
//! Sending -> AwaitingModel -> ExecutingTools -> Sending -> ... -> Done
//!                  |
//!                  +-> Failed (model error, round limit, cancel)
//! ```
//!
//! Tool failures are fed back to the model as `{"error": ...}` results and
//! never end the turn. Model failures end it with a single `error` event.
//! Tool calls run one at a time, in the order the model listed them.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::catalog::ToolCatalog;
use super::errors::AgentError;
use super::events::{event_channel, AgentEvent, EventEmitter, EventStream};
use super::history::HistoryStore;
use super::storage::BlobStorage;
use super::types::{ToolCallRecord, TurnRequest, UploadedImage};
use crate::inference::types::{ContentPart, ImageUrl, ModelReply, Role, ToolCall};
use crate::inference::{ChatMessage, LanguageModel};
use crate::mcp_client::naming::unprefix_tool_name;
use crate::mcp_client::{CallResult, ConnectionRegistry};

// ─── Options ────────────────────────────────────────────────────────────────

pub const DEFAULT_MAX_ROUNDS: usize = 10;
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 6000;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Model calls allowed per turn.
    pub max_rounds: usize,
    /// Model-facing tool text is cut to this many characters.
    pub max_tool_result_chars: usize,
    /// Prepended to the history when set.
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            system_prompt: None,
        }
    }
}

// ─── Types ──────────────────────────────────────────────────────────────────

enum TurnState {
    Sending,
    AwaitingModel,
    ExecutingTools(ModelReply),
    Done(String),
    Failed(AgentError),
}

/// What happened during a turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub answer: Option<String>,
    pub error: Option<String>,
    /// Model calls made.
    pub rounds: usize,
    pub tool_calls: Vec<ToolCallRecord>,
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

pub struct Orchestrator {
    registry: Arc<ConnectionRegistry>,
    model: Arc<dyn LanguageModel>,
    history: Arc<dyn HistoryStore>,
    storage: Arc<dyn BlobStorage>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        model: Arc<dyn LanguageModel>,
        history: Arc<dyn HistoryStore>,
        storage: Arc<dyn BlobStorage>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            registry,
            model,
            history,
            storage,
            options,
        }
    }

    /// Run a turn on a background task and return its event stream.
    pub fn spawn_turn(
        self: &Arc<Self>,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> (EventStream, tokio::task::JoinHandle<TurnOutcome>) {
        let (mut emitter, stream) = event_channel();
        let this = Arc::clone(self);
        let handle =
            tokio::spawn(async move { this.run_turn(request, &mut emitter, &cancel).await });
        (stream, handle)
    }

    /// Run one turn to completion, emitting events as it goes.
    ///
    /// Always ends with exactly one `done` or `error` event. Cancelling
    /// `cancel`, or dropping the event receiver, aborts an in-flight model
    /// call; a tool call that has started is allowed to finish.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: &mut EventEmitter,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut outcome = TurnOutcome::default();
        let mut catalog = ToolCatalog::default();

        tracing::info!(
            session = %request.session_id,
            model = self.model.model_name(),
            attachments = request.attachments.len(),
            "turn started"
        );

        let (mut messages, mut state) = match self.build_context(&request) {
            Ok(messages) => (messages, TurnState::Sending),
            Err(e) => (Vec::new(), TurnState::Failed(e)),
        };

        loop {
            state = match state {
                TurnState::Sending => {
                    if cancel.is_cancelled() || events.is_closed() {
                        TurnState::Failed(AgentError::Cancelled)
                    } else {
                        outcome.rounds += 1;
                        TurnState::AwaitingModel
                    }
                }

                TurnState::AwaitingModel => {
                    catalog = ToolCatalog::build(&self.registry).await;
                    let tools = catalog.to_tool_definitions();

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => TurnState::Failed(AgentError::Cancelled),
                        _ = events.closed() => TurnState::Failed(AgentError::Cancelled),
                        reply = self.model.complete(&messages, &tools) => match reply {
                            Ok(reply) if reply.wants_tools() => {
                                if outcome.rounds >= self.options.max_rounds {
                                    tracing::warn!(
                                        session = %request.session_id,
                                        max_rounds = self.options.max_rounds,
                                        "tool-call round limit reached"
                                    );
                                    TurnState::Failed(AgentError::RoundLimit {
                                        max_rounds: self.options.max_rounds,
                                    })
                                } else {
                                    TurnState::ExecutingTools(reply)
                                }
                            }
                            Ok(reply) => TurnState::Done(reply.content),
                            Err(e) => {
                                tracing::error!(
                                    session = %request.session_id,
                                    round = outcome.rounds,
                                    error = %e,
                                    "model call failed"
                                );
                                TurnState::Failed(e.into())
                            }
                        },
                    }
                }

                TurnState::ExecutingTools(reply) => {
                    messages.push(ChatMessage::assistant_tool_calls(
                        &reply.content,
                        &reply.tool_calls,
                    ));

                    let mut next = TurnState::Sending;
                    for call in &reply.tool_calls {
                        // Checked between calls only; a started call runs to completion
                        if cancel.is_cancelled() || events.is_closed() {
                            next = TurnState::Failed(AgentError::Cancelled);
                            break;
                        }
                        let (record, model_text) =
                            self.execute_tool_call(call, &catalog, &request, events).await;
                        messages.push(ChatMessage::tool_result(&call.id, model_text));
                        outcome.tool_calls.push(record);
                    }
                    next
                }

                TurnState::Done(answer) => {
                    if let Err(e) =
                        self.history
                            .append(&request.session_id, Role::Assistant, &answer)
                    {
                        tracing::warn!(session = %request.session_id, error = %e, "failed to store answer");
                    }
                    tracing::info!(
                        session = %request.session_id,
                        rounds = outcome.rounds,
                        tool_calls = outcome.tool_calls.len(),
                        "turn complete"
                    );
                    events.emit(AgentEvent::Text {
                        content: answer.clone(),
                    });
                    events.emit(AgentEvent::Done {});
                    outcome.answer = Some(answer);
                    break;
                }

                TurnState::Failed(err) => {
                    let message = err.to_string();
                    tracing::warn!(session = %request.session_id, error = %message, "turn failed");
                    events.emit(AgentEvent::Error {
                        message: message.clone(),
                    });
                    outcome.error = Some(message);
                    break;
                }
            };
        }

        outcome
    }

    // ─── Context ─────────────────────────────────────────────────────────

    /// Store the user message and read the session back as model context.
    ///
    /// Attachments ride on the new user message as image parts.
    fn build_context(&self, request: &TurnRequest) -> Result<Vec<ChatMessage>, AgentError> {
        let user_id = self
            .history
            .append(&request.session_id, Role::User, &request.message)?;

        let mut messages = Vec::new();
        if let Some(prompt) = &self.options.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }

        for stored in self.history.read(&request.session_id)? {
            let message = match stored.role {
                Role::User if stored.id == user_id && !request.attachments.is_empty() => {
                    ChatMessage::user_parts(user_parts(&stored.content, request))
                }
                Role::User => ChatMessage::user(stored.content),
                Role::Assistant => ChatMessage::assistant(stored.content),
                Role::System => ChatMessage::system(stored.content),
                // Tool rounds are turn-scoped and never replayed
                Role::Tool => continue,
            };
            messages.push(message);
        }

        Ok(messages)
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Run one requested call. Returns its record and the text for the model.
    async fn execute_tool_call(
        &self,
        call: &ToolCall,
        catalog: &ToolCatalog,
        request: &TurnRequest,
        events: &mut EventEmitter,
    ) -> (ToolCallRecord, String) {
        let call_id = Uuid::new_v4().to_string();
        let (server_id, tool_name) =
            unprefix_tool_name(&call.name).unwrap_or(("", call.name.as_str()));
        let server_name = catalog.server_name(server_id).to_string();

        let mut record = ToolCallRecord::pending(
            &call_id,
            server_id,
            &server_name,
            tool_name,
            call.arguments.clone(),
        );

        events.emit(AgentEvent::ToolCallStart {
            id: call_id.clone(),
            server_id: server_id.to_string(),
            server_name,
            name: tool_name.to_string(),
            arguments: call.arguments.clone(),
        });
        record.start();

        tracing::info!(
            session = %request.session_id,
            server = %server_id,
            tool = %tool_name,
            call_id = %call_id,
            "dispatching tool call"
        );

        match self.dispatch(call, catalog).await {
            Ok(result) => {
                let images = self.upload_binaries(&result, request).await;
                let model_text = self.model_facing_text(&result, &images);

                events.emit(AgentEvent::ToolCallResult {
                    id: call_id,
                    result: Some(result.raw.clone()),
                    error: None,
                    images: (!images.is_empty()).then(|| images.clone()),
                });
                record.complete(result.raw, images);
                (record, model_text)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    server = %server_id,
                    tool = %tool_name,
                    error = %message,
                    "tool call failed"
                );
                events.emit(AgentEvent::ToolCallResult {
                    id: call_id,
                    result: None,
                    error: Some(message.clone()),
                    images: None,
                });
                record.fail(&message);
                (record, serde_json::json!({ "error": message }).to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        catalog: &ToolCatalog,
    ) -> Result<CallResult, AgentError> {
        let tool = catalog.resolve(&call.name)?;
        catalog.validate_arguments(&tool, &call.arguments)?;

        let result = self
            .registry
            .call_tool(&tool.server_id, &tool.tool_name, call.arguments.clone())
            .await?;

        if result.is_error {
            let reason = if result.text_content.is_empty() {
                "tool reported an error".to_string()
            } else {
                result.text_content
            };
            return Err(AgentError::ToolExecutionError { reason });
        }
        Ok(result)
    }

    /// Upload every binary item; failures drop that item's URL only.
    async fn upload_binaries(
        &self,
        result: &CallResult,
        request: &TurnRequest,
    ) -> Vec<UploadedImage> {
        if result.binary_items.is_empty() {
            return Vec::new();
        }
        let Some(message_id) = request.assistant_message_id.as_deref() else {
            tracing::debug!(
                count = result.binary_items.len(),
                "no assistant message id, binary outputs not uploaded"
            );
            return Vec::new();
        };

        let mut uploaded = Vec::new();
        for item in &result.binary_items {
            let bytes = match BASE64.decode(item.data.trim()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(mime_type = %item.mime_type, error = %e, "binary output is not valid base64");
                    continue;
                }
            };
            match self
                .storage
                .upload(&bytes, &item.mime_type, &request.session_id, message_id)
                .await
            {
                Ok(url) => uploaded.push(UploadedImage {
                    url,
                    mime_type: item.mime_type.clone(),
                }),
                Err(e) => {
                    tracing::warn!(mime_type = %item.mime_type, error = %e, "binary upload failed");
                }
            }
        }
        uploaded
    }

    /// Tool text for the model, plus a note of uploaded binaries.
    fn model_facing_text(&self, result: &CallResult, images: &[UploadedImage]) -> String {
        let mut text = truncate_for_model(&result.text_content, self.options.max_tool_result_chars);
        if !result.binary_items.is_empty() {
            let note = serde_json::json!({ "images": images });
            text.push_str(&format!("\n\n[binary outputs uploaded: {note}]"));
        }
        text
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn user_parts(text: &str, request: &TurnRequest) -> Vec<ContentPart> {
    let mut parts = vec![ContentPart::Text {
        text: text.to_string(),
    }];
    for attachment in &request.attachments {
        if attachment.mime_type.starts_with("image/") {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!(
                        "data:{};base64,{}",
                        attachment.mime_type,
                        BASE64.encode(&attachment.data)
                    ),
                },
            });
        } else {
            parts.push(ContentPart::Text {
                text: format!(
                    "[attachment: {}, {} bytes]",
                    attachment.mime_type,
                    attachment.data.len()
                ),
            });
        }
    }
    parts
}

/// Cut `text` to `max_chars` characters, noting the original length.
fn truncate_for_model(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n...[truncated, {} chars total]",
            &text[..cut],
            text.chars().count()
        ),
        None => text.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
