//! OpenAI-compatible inference client.
//!
//! Sends streaming chat completion requests to the configured endpoint and
//! collects tokens and tool calls into one [`ModelReply`] per round.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::{resolve_active_model, ModelConfig, ModelsConfig};
use super::errors::InferenceError;
use super::streaming::{collect_reply, parse_non_streaming_response, parse_sse_stream};
use super::types::{ChatCompletionRequest, ChatMessage, ModelReply, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── LanguageModel ───────────────────────────────────────────────────────────

/// A chat model that can request tool calls.
///
/// Dropping the returned future cancels the underlying request.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion over `messages`, offering `tools`.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, InferenceError>;

    /// Name used in logs.
    fn model_name(&self) -> &str;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for one OpenAI-compatible chat-completions endpoint.
pub struct InferenceClient {
    http: HttpClient,
    model_key: String,
    model: ModelConfig,
}

impl InferenceClient {
    /// Create a client for the active model (or the first usable fallback).
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: &ModelsConfig) -> Result<Self, InferenceError> {
        let (key, model) = resolve_active_model(config)?;
        Self::new(key, model)
    }

    pub fn new(model_key: impl Into<String>, model: ModelConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(model.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: model.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            model_key: model_key.into(),
            model,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.model.base_url
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> ChatCompletionRequest {
        let tools = (!tools.is_empty()).then(|| tools.to_vec());
        ChatCompletionRequest {
            model: self
                .model
                .model_name
                .clone()
                .unwrap_or_else(|| self.model_key.clone()),
            messages: messages.to_vec(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl LanguageModel for InferenceClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, InferenceError> {
        let url = format!("{}/chat/completions", self.model.base_url.trim_end_matches('/'));
        let body = self.request_body(messages, tools);

        // Request metadata only; the body can be huge
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending chat completion request"
        );

        let mut request = self
            .http
            .post(&url)
            .json(&body)
            .header("Accept", "text/event-stream");
        if let Some(key) = self.model.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let timeout_secs = self.model.request_timeout_secs;
        let response = request
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(&url, timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "chat completion request rejected");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let reply = if is_json {
            let text = response
                .text()
                .await
                .map_err(|e| InferenceError::from_reqwest(&url, timeout_secs, e))?;
            parse_non_streaming_response(&text)?
        } else {
            collect_reply(parse_sse_stream(response)).await?
        };

        tracing::debug!(
            chars = reply.content.len(),
            tool_calls = reply.tool_calls.len(),
            finish_reason = ?reply.finish_reason,
            "chat completion finished"
        );
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        self.model.display_name.as_deref().unwrap_or(&self.model_key)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
