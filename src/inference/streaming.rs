//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads the response body as a byte stream, splits it into SSE events with
//! the shared decoder, parses each `data:` payload as a chunk, and
//! accumulates tool calls across deltas.

use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, ModelReply, StreamChunk, ToolCall};
use crate::mcp_client::sse::{event_stream, SseEvent};

// ─── SSE parser ──────────────────────────────────────────────────────────────

/// Parse a streaming chat-completions response into `StreamChunk`s.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>> {
    parse_sse_bytes(response.bytes_stream())
}

/// Parse raw SSE bytes into `StreamChunk`s.
///
/// `[DONE]` (or the end of the body) flushes any tool calls still being
/// accumulated.
pub fn parse_sse_bytes<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamChunk, InferenceError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let events = Box::pin(event_stream(bytes));

    futures::stream::unfold(
        (events, StreamState::default(), false),
        |(mut events, mut state, mut finished)| async move {
            if finished {
                return None;
            }
            loop {
                match events.next().await {
                    Some(Ok(event)) => match state.process_event(&event) {
                        Ok(Some(chunk)) => return Some((Ok(chunk), (events, state, finished))),
                        Ok(None) if state.done => {
                            finished = true;
                            return state
                                .finalize()
                                .map(|chunk| (Ok(chunk), (events, state, finished)));
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (events, state, true))),
                    },
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (events, state, true),
                        ));
                    }
                    None => {
                        finished = true;
                        return state
                            .finalize()
                            .map(|chunk| (Ok(chunk), (events, state, finished)));
                    }
                }
            }
        },
    )
}

/// Drain a chunk stream into one complete reply.
pub async fn collect_reply<S>(stream: S) -> Result<ModelReply, InferenceError>
where
    S: Stream<Item = Result<StreamChunk, InferenceError>>,
{
    let mut stream = Box::pin(stream);
    let mut reply = ModelReply::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(token) = chunk.token {
            reply.content.push_str(&token);
        }
        if let Some(calls) = chunk.tool_calls {
            reply.tool_calls.extend(calls);
        }
        if chunk.finish_reason.is_some() {
            reply.finish_reason = chunk.finish_reason;
        }
    }

    Ok(reply)
}

// ─── Stream State ────────────────────────────────────────────────────────────

/// In-progress tool call, keyed by its delta index.
#[derive(Debug)]
struct PendingToolCall {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Mutable state for accumulating tool call fragments across SSE events.
#[derive(Debug, Default)]
struct StreamState {
    pending_tool_calls: Vec<PendingToolCall>,
    done: bool,
}

impl StreamState {
    /// Process a single SSE event.
    fn process_event(&mut self, event: &SseEvent) -> Result<Option<StreamChunk>, InferenceError> {
        let data = event.data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(None); // Keep-alive
        }

        let chunk: ChatCompletionChunk =
            serde_json::from_str(data).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data})"),
            })?;

        Ok(self.process_chunk(chunk))
    }

    /// Process a parsed `ChatCompletionChunk`.
    fn process_chunk(&mut self, chunk: ChatCompletionChunk) -> Option<StreamChunk> {
        let choice = chunk.choices.into_iter().next()?;

        let mut result = StreamChunk {
            token: choice.delta.content.filter(|c| !c.is_empty()),
            tool_calls: None,
            finish_reason: choice.finish_reason,
        };

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let index = tc.index.unwrap_or(0);
            let (name, args) = tc
                .function
                .map(|f| (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()))
                .unwrap_or_default();

            match self.pending_tool_calls.iter_mut().find(|p| p.index == index) {
                Some(pending) => {
                    pending.name.push_str(&name);
                    pending.arguments.push_str(&args);
                    if tc.id.is_some() {
                        pending.id = tc.id;
                    }
                }
                None => self.pending_tool_calls.push(PendingToolCall {
                    index,
                    id: tc.id,
                    name,
                    arguments: args,
                }),
            }
        }

        if result.finish_reason.as_deref() == Some("tool_calls") {
            result.tool_calls = Some(self.take_tool_calls());
        }

        if result.token.is_none() && result.tool_calls.is_none() && result.finish_reason.is_none()
        {
            return None;
        }
        Some(result)
    }

    fn take_tool_calls(&mut self) -> Vec<ToolCall> {
        let mut pending = std::mem::take(&mut self.pending_tool_calls);
        pending.sort_by_key(|p| p.index);
        pending
            .into_iter()
            .map(|p| finalize_tool_call(p.id.as_deref(), &p.name, &p.arguments))
            .collect()
    }

    /// Emit tool calls that never saw a `tool_calls` finish reason.
    fn finalize(&mut self) -> Option<StreamChunk> {
        if self.pending_tool_calls.is_empty() {
            return None;
        }
        Some(StreamChunk {
            token: None,
            tool_calls: Some(self.take_tool_calls()),
            finish_reason: Some("tool_calls".into()),
        })
    }
}

/// Build a `ToolCall` from accumulated fragments.
///
/// Empty arguments become `{}`; text that is not valid JSON is kept as a
/// string so the caller can report it against the specific call.
fn finalize_tool_call(id: Option<&str>, name: &str, arguments: &str) -> ToolCall {
    let trimmed = arguments.trim();
    let arguments = if trimmed.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()))
    };
    ToolCall {
        id: id
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
        name: name.trim().to_string(),
        arguments,
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse a non-streaming response body into a reply.
///
/// Some endpoints ignore `stream: true` and answer with a plain JSON body.
pub fn parse_non_streaming_response(body: &str) -> Result<ModelReply, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        choices: Vec<NonStreamChoice>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        content: Option<String>,
        tool_calls: Option<Vec<NonStreamToolCall>>,
    }

    #[derive(Deserialize)]
    struct NonStreamToolCall {
        id: Option<String>,
        function: NonStreamFunction,
    }

    #[derive(Deserialize)]
    struct NonStreamFunction {
        name: String,
        #[serde(default)]
        arguments: String,
    }

    let resp: NonStreamResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse non-streaming response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::StreamError {
            reason: "empty choices array".into(),
        })?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .iter()
        .map(|tc| finalize_tool_call(tc.id.as_deref(), &tc.function.name, &tc.function.arguments))
        .collect();

    let finish_reason = if tool_calls.is_empty() {
        choice.finish_reason
    } else {
        Some("tool_calls".into())
    };

    Ok(ModelReply {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
