//! Configuration management
//!
//! This module handles loading, validation, and management of the Launchpad configuration.
//! Configuration is stored in TOML format at ~/.launchpad/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory, generated projects directory
//! - **llm**: Model provider settings
//! - **pipeline**: Stage timeouts, retry backoff, request and document limits
//! - **deploy**: Port range, process commands, health check and stop timings
//! - **store**: Artifact store used for bundle uploads
//!
//! Every section and field has a default, so an empty file is a valid configuration.
//!
//! # Examples
//!
//! ```no_run
//! use launchpad_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Projects: {:?}", config.core.projects_dir);
//! println!("Ports: {}-{}", config.deploy.port_range_start, config.deploy.port_range_end);
//! # Ok(())
//! # }
//! ```

use sdk::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Model provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Pipeline stage settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Deployer settings
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Artifact store settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory generated bundles are written to (supports ~ expansion)
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default provider (ollama, openai)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Sampling temperature for generation stages
    #[serde(default = "default_temperature")]
    pub temperature: f32,

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

    /// Environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

/// Pipeline stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Timeout for a single model call
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Fixed delay before the single retry of a transient failure
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Request descriptions longer than this are truncated
    #[serde(default = "default_max_request_chars")]
    pub max_request_chars: usize,

    /// Extracted document text longer than this is truncated
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,

    /// Documents larger than this are rejected before extraction
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,

    /// Re-ask the model once when generated source looks truncated
    #[serde(default = "default_true")]
    pub completeness_retry: bool,
}

/// Deployer configuration
///
/// Command templates are argv vectors. The placeholders `{port}`, `{dir}`,
/// `{host}` and `{self}` (path of the running launchpad binary) are substituted
/// per argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Interface services bind to and URLs point at
    #[serde(default = "default_host")]
    pub host: String,

    /// First port of the allocation range (inclusive)
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last port of the allocation range (inclusive)
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    /// A process exiting within this window counts as a failed spawn
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,

    /// Maximum number of backend health probes
    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,

    /// Delay between health probes
    #[serde(default = "default_health_delay")]
    pub health_delay_ms: u64,

    /// Timeout of a single health probe
    #[serde(default = "default_health_request_timeout")]
    pub health_request_timeout_ms: u64,

    /// Time allowed between SIGTERM and SIGKILL
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    /// Backend command, run inside `backend/`
    #[serde(default = "default_backend_command")]
    pub backend_command: Vec<String>,

    /// Frontend command, run inside `frontend/`
    #[serde(default = "default_frontend_command")]
    pub frontend_command: Vec<String>,

    /// Dependency install command run inside `backend/` before spawning (empty disables)
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,

    /// Timeout for the dependency install
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
}

/// Kind of artifact store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    None,
    Filesystem,
    Http,
}

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_kind")]
    pub kind: StoreKind,

    /// Root directory for the filesystem store (supports ~ expansion)
    #[serde(default = "default_store_root")]
    pub root: PathBuf,

    /// Base URL objects are PUT under, for the http store
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding a bearer token for the http store
    #[serde(default)]
    pub token_env: Option<String>,

    /// Upper bound on uploading one bundle, and on each http request
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.launchpad")
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("~/.launchpad/projects")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "deepseek-r1:latest".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_stage_timeout() -> u64 {
    300
}

fn default_retry_backoff() -> u64 {
    1_000
}

fn default_max_request_chars() -> usize {
    15_000
}

fn default_max_document_chars() -> usize {
    100_000
}

fn default_max_document_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port_range_start() -> u16 {
    8001
}

fn default_port_range_end() -> u16 {
    8099
}

fn default_startup_grace() -> u64 {
    2_000
}

fn default_health_attempts() -> u32 {
    30
}

fn default_health_delay() -> u64 {
    1_000
}

fn default_health_request_timeout() -> u64 {
    2_000
}

fn default_stop_timeout() -> u64 {
    5_000
}

fn default_backend_command() -> Vec<String> {
    [
        "python", "-m", "uvicorn", "app:app", "--host", "{host}", "--port", "{port}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_frontend_command() -> Vec<String> {
    [
        "{self}",
        "serve-static",
        "--dir",
        "{dir}",
        "--host",
        "{host}",
        "--port",
        "{port}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_install_command() -> Vec<String> {
    ["python", "-m", "pip", "install", "-q", "-r", "requirements.txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_install_timeout() -> u64 {
    120
}

fn default_store_kind() -> StoreKind {
    StoreKind::None
}

fn default_store_root() -> PathBuf {
    PathBuf::from("~/.launchpad/store")
}

fn default_store_timeout() -> u64 {
    30
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            projects_dir: default_projects_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            temperature: default_temperature(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
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
            api_key_env: default_openai_key_env(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            max_request_chars: default_max_request_chars(),
            max_document_chars: default_max_document_chars(),
            max_document_bytes: default_max_document_bytes(),
            completeness_retry: true,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            startup_grace_ms: default_startup_grace(),
            health_attempts: default_health_attempts(),
            health_delay_ms: default_health_delay(),
            health_request_timeout_ms: default_health_request_timeout(),
            stop_timeout_ms: default_stop_timeout(),
            backend_command: default_backend_command(),
            frontend_command: default_frontend_command(),
            install_command: default_install_command(),
            install_timeout_secs: default_install_timeout(),
        }
    }
}

impl DeployConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn health_delay(&self) -> Duration {
        Duration::from_millis(self.health_delay_ms)
    }

    pub fn health_request_timeout(&self) -> Duration {
        Duration::from_millis(self.health_request_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            root: default_store_root(),
            base_url: None,
            token_env: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from the default location (~/.launchpad/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, PipelineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before path expansion so the file keeps the portable ~ form
        let config = Self::default();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| PipelineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.launchpad/config.toml)
    fn default_config_path() -> Result<PathBuf, PipelineError> {
        let home = dirs::home_dir().ok_or_else(|| {
            PipelineError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".launchpad").join("config.toml"))
    }

    /// Path of the deployment registry database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("launchpad.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated fields and numeric ranges
    /// - Expands ~ in paths
    /// - Creates the data and projects directories if they don't exist
    pub fn validate_and_process(&mut self) -> Result<(), PipelineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(PipelineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(PipelineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(PipelineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.pipeline.stage_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "stage_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let deploy = &self.deploy;
        if deploy.port_range_start == 0 || deploy.port_range_end <= deploy.port_range_start {
            return Err(PipelineError::Config(format!(
                "Invalid port range {}-{}: need at least two ports above 0",
                deploy.port_range_start, deploy.port_range_end
            )));
        }
        if deploy.health_attempts == 0 {
            return Err(PipelineError::Config(
                "health_attempts must be at least 1".to_string(),
            ));
        }
        if deploy.backend_command.is_empty() || deploy.frontend_command.is_empty() {
            return Err(PipelineError::Config(
                "backend_command and frontend_command must not be empty".to_string(),
            ));
        }

        if self.store.timeout_secs == 0 {
            return Err(PipelineError::Config(
                "store.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.store.kind == StoreKind::Http && self.store.base_url.is_none() {
            return Err(PipelineError::Config(
                "store.base_url is required when store.kind = \"http\"".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.core.projects_dir = expand_path(&self.core.projects_dir)?;
        self.store.root = expand_path(&self.store.root)?;

        for dir in [&self.core.data_dir, &self.core.projects_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    PipelineError::Config(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, PipelineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PipelineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            PipelineError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| PipelineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.default_provider, "ollama");
        assert_eq!(config.llm.ollama.model, "deepseek-r1:latest");
        assert_eq!(config.pipeline.max_request_chars, 15_000);
        assert_eq!(config.pipeline.max_document_chars, 100_000);
        assert!(config.deploy.port_range_end > config.deploy.port_range_start);
        assert_eq!(config.store.kind, StoreKind::None);
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
    fn test_partial_toml_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let toml = format!(
            r#"
            [core]
            data_dir = "{data}"
            projects_dir = "{data}/projects"

            [deploy]
            port_range_start = 9100
            port_range_end = 9101
            "#,
            data = dir.path().display()
        );

        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.deploy.port_range_start, 9100);
        assert_eq!(config.deploy.health_attempts, default_health_attempts());
        assert_eq!(config.llm.ollama.base_url, "http://localhost:11434");
        assert!(config.core.projects_dir.is_dir());
    }

    #[test]
    fn test_rejects_single_port_range() {
        let mut config = Config::default();
        config.deploy.port_range_start = 9000;
        config.deploy.port_range_end = 9000;

        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("port range"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let mut config = Config::default();
        config.llm.default_provider = "carrier-pigeon".to_string();

        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_http_store_requires_base_url() {
        let mut config = Config::default();
        config.store.kind = StoreKind::Http;

        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_rejects_zero_store_timeout() {
        let mut config = Config::default();
        config.store.timeout_secs = 0;

        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("store.timeout_secs"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.deploy.backend_command,
            deserialized.deploy.backend_command
        );
    }
}
