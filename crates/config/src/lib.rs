//! Configuration loading, validation, and management for Wayfarer.
//!
//! Two sources:
//! - `~/.wayfarer/config.toml` ([`AppConfig`]): provider, model, session
//!   backend, refinement-loop limits, tool keys. Environment variables
//!   override the file.
//! - an agents YAML file ([`AgentCatalog`]): agent name → model,
//!   description and instruction template. Loaded once, read-only after.

pub mod catalog;

pub use catalog::{AgentCatalog, AgentDefinition};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.wayfarer/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Application name sessions are filed under
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// User id for console sessions
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Agents YAML file; defaults to `~/.wayfarer/agents.yaml`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents_file: Option<PathBuf>,

    /// Session storage
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Critique/refine loop settings
    #[serde(default)]
    pub refinement: RefinementConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_app_name() -> String {
    "wayfarer".into()
}
fn default_user_id() -> String {
    "console_user".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("app_name", &self.app_name)
            .field("user_id", &self.user_id)
            .field("agents_file", &self.agents_file)
            .field("sessions", &self.sessions)
            .field("refinement", &self.refinement)
            .field("tools", &self.tools)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Where sessions live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// "memory" or "sqlite"
    #[serde(default = "default_session_backend")]
    pub backend: String,

    /// SQLite URL; defaults to `~/.wayfarer/sessions.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_session_backend() -> String {
    "memory".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            database_url: None,
        }
    }
}

impl SessionConfig {
    /// The SQLite URL to open, falling back to the config directory.
    pub fn resolved_database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}", AppConfig::config_dir().join("sessions.db").display())
        })
    }
}

/// Critique/refine loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Refinement cycles before the loop gives up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Critic text that counts as approval
    #[serde(default = "default_completion_phrase")]
    pub completion_phrase: String,
}

fn default_max_iterations() -> u32 {
    3
}
fn default_completion_phrase() -> String {
    "The plan is feasible and meets all constraints.".into()
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            completion_phrase: default_completion_phrase(),
        }
    }
}

/// Built-in tool settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tavily key for `web_search`; `TAVILY_API_KEY` overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,

    /// HTTP timeout for tools that call external APIs
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.wayfarer/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `WAYFARER_API_KEY`, then `OPENAI_API_KEY`, then `OPENROUTER_API_KEY`
    /// - `WAYFARER_PROVIDER`, `WAYFARER_MODEL`
    /// - `TAVILY_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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
        if let Some(key) = lookup("WAYFARER_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = lookup("OPENAI_API_KEY").or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(provider) = lookup("WAYFARER_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("WAYFARER_MODEL") {
            self.default_model = model;
        }
        if let Some(key) = lookup("TAVILY_API_KEY") {
            self.tools.tavily_api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".wayfarer")
    }

    /// The agents YAML file to load.
    pub fn agents_path(&self) -> PathBuf {
        self.agents_file
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("agents.yaml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.refinement.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "refinement.max_iterations must be at least 1".into(),
            ));
        }

        if self.refinement.completion_phrase.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "refinement.completion_phrase must not be empty".into(),
            ));
        }

        match self.sessions.backend.as_str() {
            "memory" | "sqlite" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "sessions.backend must be \"memory\" or \"sqlite\", got \"{other}\""
                )));
            }
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
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            app_name: default_app_name(),
            user_id: default_user_id(),
            agents_file: None,
            sessions: SessionConfig::default(),
            refinement: RefinementConfig::default(),
            tools: ToolsConfig::default(),
            providers: HashMap::new(),
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

    #[error("No agent named '{0}' in the agent catalog")]
    MissingAgent(String),
}
