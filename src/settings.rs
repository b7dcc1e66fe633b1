//! Application settings.
//!
//! Reads `mcpchat.yaml` and resolves environment variables. Lookup order:
//! `$MCPCHAT_HOME/mcpchat.yaml`, then upward from the working directory,
//! then the platform data directory. A missing file means defaults, which
//! is enough for managing servers but not for chatting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::orchestrator::{
    OrchestratorOptions, DEFAULT_MAX_ROUNDS, DEFAULT_MAX_TOOL_RESULT_CHARS,
};
use crate::inference::config::{ModelConfig, ModelsConfig};
use crate::mcp_client::RegistryOptions;

pub const SETTINGS_FILE: &str = "mcpchat.yaml";
pub const HOME_ENV: &str = "MCPCHAT_HOME";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("no models configured (add `active_model` and `models` to mcpchat.yaml)")]
    NoModels,
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Orchestrator limits and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_timeout_secs")]
    pub tool_call_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_tool_result_chars() -> usize {
    DEFAULT_MAX_TOOL_RESULT_CHARS
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            tool_call_timeout_secs: default_timeout_secs(),
            handshake_timeout_secs: default_timeout_secs(),
            max_tool_result_chars: default_max_tool_result_chars(),
            system_prompt: None,
        }
    }
}

/// Where uploaded tool binaries go.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub dir: Option<String>,
    /// Prefix for returned URLs. Defaults to a `file://` URL of `dir`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// Contents of `mcpchat.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub active_model: Option<String>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    /// JSON file of server definitions.
    #[serde(default)]
    pub servers_file: Option<String>,
    /// SQLite conversation history.
    #[serde(default)]
    pub history_db: Option<String>,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Settings {
    /// Find and load the settings file, or fall back to defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let cwd = std::env::current_dir().unwrap_or_default();
        let home = std::env::var_os(HOME_ENV).map(PathBuf::from);
        match find_settings_path(&cwd, home.as_deref()) {
            Some(path) => Self::load(&path),
            None => {
                tracing::info!("no {SETTINGS_FILE} found, using defaults");
                Ok(Self {
                    base_dir: crate::data_dir(),
                    ..Default::default()
                })
            }
        }
    }

    /// Load and parse a settings file.
    ///
    /// Performs environment-variable interpolation on `${VAR_NAME}` and
    /// `${VAR_NAME:-default}` before parsing.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|e| SettingsError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut settings: Settings = serde_yaml::from_str(&interpolate_env_vars(&raw))
            .map_err(|e| SettingsError::ParseFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        settings.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        tracing::debug!(path = %path.display(), models = settings.models.len(), "loaded settings");
        Ok(settings)
    }

    /// The model section, for the inference client.
    pub fn models_config(&self) -> Result<ModelsConfig, SettingsError> {
        if self.models.is_empty() {
            return Err(SettingsError::NoModels);
        }
        let active_model = self
            .active_model
            .clone()
            .or_else(|| self.fallback_chain.first().cloned())
            .ok_or(SettingsError::NoModels)?;
        Ok(ModelsConfig {
            active_model,
            models: self.models.clone(),
            fallback_chain: self.fallback_chain.clone(),
        })
    }

    pub fn servers_path(&self) -> PathBuf {
        self.resolve(self.servers_file.as_deref(), "servers.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.resolve(self.history_db.as_deref(), "history.db")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.resolve(self.storage.dir.as_deref(), "blobs")
    }

    pub fn public_base_url(&self) -> String {
        self.storage
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("file://{}", self.storage_dir().display()))
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            handshake_timeout: Duration::from_secs(self.orchestrator.handshake_timeout_secs),
            call_timeout: Duration::from_secs(self.orchestrator.tool_call_timeout_secs),
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_rounds: self.orchestrator.max_rounds,
            max_tool_result_chars: self.orchestrator.max_tool_result_chars,
            system_prompt: self.orchestrator.system_prompt.clone(),
        }
    }

    /// Absolute paths and `~` are kept; anything else is relative to `base_dir`.
    fn resolve(&self, configured: Option<&str>, default_name: &str) -> PathBuf {
        match configured {
            Some(path) => {
                let path = PathBuf::from(expand_tilde(path));
                if path.is_absolute() {
                    path
                } else {
                    self.base_dir.join(path)
                }
            }
            None => self.base_dir.join(default_name),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `mcpchat.yaml`.
///
/// Checks `home` first, then walks upward from `start`, then the platform
/// data directory.
pub fn find_settings_path(start: &Path, home: Option<&Path>) -> Option<PathBuf> {
    if let Some(home) = home {
        let candidate = home.join(SETTINGS_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Some(crate::data_dir().join(SETTINGS_FILE)).filter(|p| p.exists())
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__MCPCHAT_TEST_UNSET__");
        assert_eq!(
            interpolate_env_vars("${__MCPCHAT_TEST_UNSET__:-/fallback/path}"),
            "/fallback/path"
        );
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__MCPCHAT_TEST_KEY__", "sk-test");
        assert_eq!(
            interpolate_env_vars("api_key: ${__MCPCHAT_TEST_KEY__}"),
            "api_key: sk-test"
        );
        std::env::remove_var("__MCPCHAT_TEST_KEY__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with $dollar but no braces";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/Documents");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/Documents"));
        assert_eq!(expand_tilde("/abs"), "/abs");
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"
active_model: local
models:
  local:
    base_url: "http://localhost:11434/v1"
    model_name: "qwen2.5:7b"
    api_key: "${__MCPCHAT_TEST_MISSING_KEY__:-none}"
orchestrator:
  max_rounds: 4
  system_prompt: "Use tools when helpful."
storage:
  dir: blobs
  public_base_url: "http://localhost:8080/blobs"
servers_file: config/servers.json
history_db: /var/lib/mcpchat/history.db
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        let models = settings.models_config().unwrap();
        assert_eq!(models.active_model, "local");
        assert_eq!(models.models["local"].api_key.as_deref(), Some("none"));

        assert_eq!(settings.orchestrator.max_rounds, 4);
        assert_eq!(settings.orchestrator.tool_call_timeout_secs, 30);
        assert_eq!(settings.orchestrator_options().max_tool_result_chars, 6000);
        assert_eq!(
            settings.registry_options().call_timeout,
            Duration::from_secs(30)
        );

        assert_eq!(settings.servers_path(), dir.path().join("config/servers.json"));
        assert_eq!(
            settings.history_path(),
            PathBuf::from("/var/lib/mcpchat/history.db")
        );
        assert_eq!(settings.storage_dir(), dir.path().join("blobs"));
        assert_eq!(settings.public_base_url(), "http://localhost:8080/blobs");
    }

    #[test]
    fn test_defaults_without_models() {
        let settings = Settings {
            base_dir: PathBuf::from("/data"),
            ..Default::default()
        };
        assert!(matches!(
            settings.models_config(),
            Err(SettingsError::NoModels)
        ));
        assert_eq!(settings.servers_path(), PathBuf::from("/data/servers.json"));
        assert_eq!(settings.public_base_url(), "file:///data/blobs");
        assert_eq!(settings.orchestrator.max_rounds, 10);
    }

    #[test]
    fn test_find_settings_path() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{}").unwrap();

        assert_eq!(
            find_settings_path(&nested, None),
            Some(dir.path().join(SETTINGS_FILE))
        );

        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(SETTINGS_FILE), "{}").unwrap();
        assert_eq!(
            find_settings_path(&nested, Some(home.path())),
            Some(home.path().join(SETTINGS_FILE))
        );
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "models: [not, a, map]").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::ParseFailed { .. })
        ));
    }
}
