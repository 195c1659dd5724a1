//! Configuration loading, validation, and management for mindloop.
//!
//! Loads configuration from `~/.mindloop/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.mindloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model and embedding endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Hard wall-clock limit for each model or embedding call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("embedding", &self.embedding)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("maintenance", &self.maintenance)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Reasoning loop iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Character budget for the message stack sent to the model
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,

    /// Per-job limit applied by the tool dispatcher
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Whether multi-phase requests are decomposed into subtasks
    #[serde(default = "default_true")]
    pub decomposition: bool,

    /// Replaces the built-in base directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> u32 {
    12
}
fn default_context_char_budget() -> usize {
    48_000
}
fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context_char_budget: default_context_char_budget(),
            tool_timeout_secs: default_tool_timeout_secs(),
            decomposition: true,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file" or "memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Store file for the "file" backend; defaults to `~/.mindloop/store.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Similarity threshold when composing context
    #[serde(default = "default_compose_threshold")]
    pub compose_threshold: f32,

    /// Similarity threshold for the RECALL tool
    #[serde(default = "default_recall_threshold")]
    pub recall_threshold: f32,
}

fn default_memory_backend() -> String {
    "file".into()
}
fn default_compose_threshold() -> f32 {
    0.2
}
fn default_recall_threshold() -> f32 {
    0.25
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            compose_threshold: default_compose_threshold(),
            recall_threshold: default_recall_threshold(),
        }
    }
}

impl MemoryConfig {
    /// The store file path, falling back to the default location.
    pub fn store_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("store.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_summary_every")]
    pub summary_every: u64,

    #[serde(default = "default_profile_every")]
    pub profile_every: u64,

    #[serde(default = "default_skill_eval_every")]
    pub skill_eval_every: u64,

    /// Condense once raw history grows past this many messages
    #[serde(default = "default_condense_over")]
    pub condense_over: usize,

    /// Raw messages kept after condensation
    #[serde(default = "default_condense_keep")]
    pub condense_keep: usize,
}

fn default_summary_every() -> u64 {
    3
}
fn default_profile_every() -> u64 {
    5
}
fn default_skill_eval_every() -> u64 {
    10
}
fn default_condense_over() -> usize {
    40
}
fn default_condense_keep() -> usize {
    30
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            summary_every: default_summary_every(),
            profile_every: default_profile_every(),
            skill_eval_every: default_skill_eval_every(),
            condense_over: default_condense_over(),
            condense_keep: default_condense_keep(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.mindloop/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `MINDLOOP_API_KEY`, then `OPENAI_API_KEY`
    /// - `MINDLOOP_MODEL`
    /// - `MINDLOOP_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("MINDLOOP_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("MINDLOOP_MODEL") {
            self.model = model;
        }
        if let Some(url) = lookup("MINDLOOP_BASE_URL") {
            self.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mindloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("memory.compose_threshold", self.memory.compose_threshold),
            ("memory.recall_threshold", self.memory.recall_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        let m = &self.maintenance;
        if m.summary_every == 0 || m.profile_every == 0 || m.skill_eval_every == 0 {
            return Err(ConfigError::ValidationError(
                "maintenance cadences must be at least 1".into(),
            ));
        }
        if m.condense_keep >= m.condense_over {
            return Err(ConfigError::ValidationError(
                "maintenance.condense_keep must be smaller than condense_over".into(),
            ));
        }
        if !matches!(self.memory.backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory backend '{}'",
                self.memory.backend
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            embedding: EmbeddingConfig::default(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 12);
        assert_eq!(config.maintenance.summary_every, 3);
        assert!((config.memory.compose_threshold - 0.2).abs() < f32::EPSILON);
        assert!((config.memory.recall_threshold - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, "gpt-4o-mini");
        assert_eq!(parsed.agent.context_char_budget, 48_000);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn condense_keep_must_be_below_threshold() {
        let mut config = AppConfig::default();
        config.maintenance.condense_keep = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.memory.backend, "file");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "model = \"local-model\"\n[agent]\nmax_iterations = 4\n[memory]\nbackend = \"memory\"\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "local-model");
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.tool_timeout_secs, 60);
        assert_eq!(config.memory.backend, "memory");
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_take_priority() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("MINDLOOP_MODEL", "override-model"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.model, "override-model");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
