//! Configuration management
//!
//! This module handles loading, validation, and management of the Cadence configuration.
//! Configuration is stored in TOML format at ~/.cadence/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, snapshot directory, capability workspace
//! - **llm**: Generative provider selection and settings
//! - **budget**: Default token / wall-clock / step ceilings for a run
//! - **orchestrator**: Retry, step timeout and snapshot behaviour
//! - **capabilities**: Built-in capability enablement
//!
//! # Examples
//!
//! ```no_run
//! use cadence_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Default provider: {}", config.llm.default_provider);
//! println!("Max steps: {}", config.budget.max_steps);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Generative provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Default run budget
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Control-loop behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Built-in capability enablement
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory for run snapshots (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root directory the filesystem capabilities are confined to (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

/// Generative provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default provider (ollama, openai)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Upper bound for a single generative call
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for the chat completions API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            workspace: default_workspace(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            generation_timeout_secs: default_generation_timeout(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

/// Default run budget. Every ceiling must be positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    #[serde(default = "default_max_time_secs")]
    pub max_time_secs: u64,

    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_time_secs: default_max_time_secs(),
            max_steps: default_max_steps(),
        }
    }
}

/// Control-loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries granted to steps whose plan record does not specify any
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Timeout for steps whose plan record does not specify one
    #[serde(default = "default_step_timeout")]
    pub default_step_timeout_secs: u64,

    /// Save a snapshot under `<data_dir>/runs/` after every tick
    #[serde(default)]
    pub snapshot_every_tick: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            default_step_timeout_secs: default_step_timeout(),
            snapshot_every_tick: false,
        }
    }
}

/// Built-in capability enablement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Enable read_file / write_file / list_dir
    #[serde(default = "default_true")]
    pub filesystem: bool,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self { filesystem: true }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.cadence")
}

fn default_workspace() -> PathBuf {
    PathBuf::from("~/.cadence/workspace")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_generation_timeout() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u64 {
    50_000
}

fn default_max_time_secs() -> u64 {
    600
}

fn default_max_steps() -> u32 {
    25
}

fn default_max_retries() -> u32 {
    2
}

fn default_step_timeout() -> u64 {
    60
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_api_key_env(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.cadence/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        // Persist the unexpanded form so the file stays portable
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.cadence/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".cadence").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            budget: BudgetConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            capabilities: CapabilitiesConfig::default(),
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Expands ~ in paths
    /// - Creates and canonicalizes the workspace and data directories
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.generation_timeout_secs == 0 {
            return Err(EngineError::Config(
                "generation_timeout_secs must be > 0".to_string(),
            ));
        }

        let budget = &self.budget;
        if budget.max_tokens == 0 || budget.max_time_secs == 0 || budget.max_steps == 0 {
            return Err(EngineError::Config(
                "budget ceilings (max_tokens, max_time_secs, max_steps) must all be > 0"
                    .to_string(),
            ));
        }

        if self.orchestrator.default_step_timeout_secs == 0 {
            return Err(EngineError::Config(
                "default_step_timeout_secs must be > 0".to_string(),
            ));
        }

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Directory where per-run snapshots are written
    pub fn runs_dir(&self) -> PathBuf {
        self.core.data_dir.join("runs")
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.default_provider, "ollama");
        assert_eq!(config.budget.max_steps, 25);
        assert_eq!(config.orchestrator.default_max_retries, 2);
        assert!(config.capabilities.filesystem);
        assert!(!config.orchestrator.snapshot_every_tick);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.budget.max_tokens, deserialized.budget.max_tokens);
        assert_eq!(
            config.llm.openai.api_key_env,
            deserialized.llm.openai.api_key_env
        );
    }

    #[test]
    fn test_optional_sections_default() {
        let minimal = r#"
[core]
log_level = "debug"

[llm]
default_provider = "openai"
"#;
        let config: Config = toml::from_str(minimal).unwrap();
        assert_eq!(config.budget.max_time_secs, 600);
        assert_eq!(config.orchestrator.default_step_timeout_secs, 60);
        assert_eq!(config.llm.generation_timeout_secs, 120);
    }

    #[test]
    fn test_empty_and_core_only_files_parse() {
        let empty: Config = toml::from_str("").unwrap();
        assert_eq!(empty.core.log_level, "info");
        assert_eq!(empty.llm.default_provider, "ollama");
        assert_eq!(empty.llm.ollama.model, "llama3.1:8b");

        let core_only: Config = toml::from_str("[core]\nlog_level = \"loud\"\n").unwrap();
        assert_eq!(core_only.core.log_level, "loud");
        assert_eq!(core_only.llm.generation_timeout_secs, 120);
        assert_eq!(core_only.core.workspace, PathBuf::from("~/.cadence/workspace"));
    }
}
