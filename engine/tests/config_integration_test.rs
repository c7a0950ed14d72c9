//! Integration tests for configuration management
//!
//! These tests verify that the Config struct can be properly loaded,
//! validated, and processed with path expansion and directory creation.

use launchpad_engine::config::{Config, StoreKind};
use sdk::PipelineError;
use tempfile::TempDir;

#[test]
fn test_config_file_loading() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    let projects_dir = temp_dir.path().join("projects");
    let config_path = temp_dir.path().join("config.toml");

    let toml_content = format!(
        r#"
[core]
log_level = "debug"
data_dir = "{}"
projects_dir = "{}"

[llm]
default_provider = "openai"
temperature = 0.4

[llm.ollama]
base_url = "http://gpu-box:11434"
model = "qwen2.5-coder:14b"

[llm.openai]
model = "gpt-4o"
api_key_env = "LAUNCHPAD_OPENAI_KEY"

[pipeline]
stage_timeout_secs = 120
completeness_retry = false

[deploy]
port_range_start = 9100
port_range_end = 9199
backend_command = ["uvicorn", "app:app", "--port", "{{port}}"]

[store]
kind = "filesystem"
root = "{}"
"#,
        data_dir.display(),
        projects_dir.display(),
        temp_dir.path().join("store").display()
    );
    std::fs::write(&config_path, toml_content).unwrap();

    let config = Config::load_from_path(&config_path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.llm.default_provider, "openai");
    assert_eq!(config.llm.temperature, 0.4);
    assert_eq!(config.llm.ollama.model, "qwen2.5-coder:14b");
    assert_eq!(config.llm.openai.api_key_env, "LAUNCHPAD_OPENAI_KEY");
    assert_eq!(config.pipeline.stage_timeout_secs, 120);
    assert!(!config.pipeline.completeness_retry);
    assert_eq!(config.deploy.port_range_start, 9100);
    assert_eq!(config.deploy.backend_command[3], "{port}");
    assert_eq!(config.store.kind, StoreKind::Filesystem);

    // Untouched sections keep their defaults
    assert_eq!(config.deploy.host, "127.0.0.1");
    assert_eq!(config.deploy.frontend_command[1], "serve-static");
    assert_eq!(config.pipeline.max_request_chars, 15_000);

    // Directories are created during validation
    assert!(data_dir.is_dir());
    assert!(projects_dir.is_dir());
    assert_eq!(config.database_path(), data_dir.join("launchpad.db"));
}

#[test]
fn test_minimal_config_with_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let toml_content = format!(
        "[core]\ndata_dir = \"{}\"\nprojects_dir = \"{}\"\n",
        temp_dir.path().join("d").display(),
        temp_dir.path().join("p").display()
    );

    let config = Config::from_toml_str(&toml_content).unwrap();

    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.llm.default_provider, "ollama");
    assert_eq!(config.llm.ollama.base_url, "http://localhost:11434");
    assert_eq!(config.pipeline.stage_timeout_secs, 300);
    assert_eq!(config.deploy.port_range_start, 8001);
    assert_eq!(config.deploy.port_range_end, 8099);
    assert_eq!(config.store.kind, StoreKind::None);
}

#[test]
fn test_missing_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();

    let error = Config::load_from_path(&temp_dir.path().join("absent.toml")).unwrap_err();

    assert!(matches!(error, PipelineError::Config(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let error = Config::from_toml_str("[core\nlog_level = ").unwrap_err();
    assert!(matches!(error, PipelineError::Config(msg) if msg.contains("parse")));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        "[core]\nlog_level = \"verbose\"",
        "[llm]\ndefault_provider = \"gemini\"",
        "[llm]\ntemperature = 3.5",
        "[pipeline]\nstage_timeout_secs = 0",
        "[deploy]\nport_range_start = 9000\nport_range_end = 9000",
        "[deploy]\nhealth_attempts = 0",
        "[deploy]\nbackend_command = []",
        "[store]\nkind = \"http\"",
    ];

    for case in cases {
        let result = Config::from_toml_str(case);
        assert!(
            matches!(result, Err(PipelineError::Config(_))),
            "accepted invalid config: {}",
            case
        );
    }
}
