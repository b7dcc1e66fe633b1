//! Model configuration.
//!
//! The `active_model` / `models` / `fallback_chain` part of `mcpchat.yaml`.
//! Loading and env-var interpolation live in `crate::settings`.

use std::collections::HashMap;

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Public Types ────────────────────────────────────────────────────────────

/// A single model endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the OpenAI-compatible API, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    /// Name sent in the request body. Defaults to the model key.
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sent as a bearer token when present.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Total request timeout for one streamed completion.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout_secs() -> u64 {
    180
}

/// Model registry section of the settings file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelConfig>,
    /// Keys tried in order when `active_model` is not defined.
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

/// Resolve the active model configuration, respecting the fallback chain.
///
/// Returns `(model_key, ModelConfig)` for the first model defined in config.
/// Reachability is not checked here.
pub fn resolve_active_model(
    config: &ModelsConfig,
) -> Result<(String, ModelConfig), InferenceError> {
    if let Some(model) = config.models.get(&config.active_model) {
        return Ok((config.active_model.clone(), model.clone()));
    }

    for key in &config.fallback_chain {
        if let Some(model) = config.models.get(key) {
            tracing::warn!(
                active = %config.active_model,
                fallback = %key,
                "active model not configured, using fallback"
            );
            return Ok((key.clone(), model.clone()));
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!(
            "active model '{}' not found in config and no fallback available",
            config.active_model
        ),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
        active_model: missing
        fallback_chain: [nope, local]
        models:
          local:
            base_url: "http://localhost:11434/v1"
            model_name: "qwen2.5:7b"
    "#;

    #[test]
    fn test_defaults_applied() {
        let config: ModelsConfig = serde_yaml::from_str(YAML).unwrap();
        let model = config.models.get("local").unwrap();
        assert_eq!(model.max_tokens, 2048);
        assert_eq!(model.request_timeout_secs, 180);
        assert!(model.api_key.is_none());
    }

    #[test]
    fn test_resolve_walks_fallback_chain() {
        let config: ModelsConfig = serde_yaml::from_str(YAML).unwrap();
        let (key, model) = resolve_active_model(&config).unwrap();
        assert_eq!(key, "local");
        assert_eq!(model.model_name.as_deref(), Some("qwen2.5:7b"));
    }

    #[test]
    fn test_resolve_active_model_not_found() {
        let config = ModelsConfig {
            active_model: "nonexistent".into(),
            models: HashMap::new(),
            fallback_chain: vec![],
        };
        assert!(matches!(
            resolve_active_model(&config),
            Err(InferenceError::ConfigError { .. })
        ));
    }
}
