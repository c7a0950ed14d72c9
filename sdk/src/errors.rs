//! Error types and handling
//!
//! This module provides the error taxonomy shared by every pipeline stage,
//! the integrator and the deployer. All errors implement the
//! `PipelineErrorExt` trait which provides user-facing hints and the retry
//! classification the orchestrator relies on.
//!
//! # Propagation
//!
//! - `Validation` and `ModelCall` abort the run at the stage where they occur
//! - `Integration`, `PortExhaustion`, `ProcessSpawn` and `HealthCheckTimeout`
//!   abort the run but leave earlier artifacts visible in the result
//! - `StorageUpload` is never fatal; callers log it and continue

use thiserror::Error;

/// Trait for pipeline error extensions
pub trait PipelineErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets, file paths or raw model output.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is transient
    ///
    /// Transient errors get exactly one automatic retry from the orchestrator.
    fn is_transient(&self) -> bool;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be resolved by the user retrying the request or
    /// adjusting configuration. Non-recoverable errors need operator attention.
    fn is_recoverable(&self) -> bool;
}

/// Failure of a single language-model call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelCallError {
    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("model provider rate limit exceeded")]
    RateLimited,

    #[error("model provider unavailable: {0}")]
    Unavailable(String),

    #[error("model provider rejected credentials: {0}")]
    Authentication(String),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model returned a malformed response: {0}")]
    Malformed(String),
}

impl ModelCallError {
    /// Timeouts and rate limits are the only transient model failures
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited)
    }
}

/// Main pipeline error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{ModelCallError, PipelineError, PipelineErrorExt};
///
/// let error = PipelineError::ModelCall(ModelCallError::Timeout(120));
/// assert!(error.is_transient());
/// assert_eq!(error.kind(), "model_call_error");
///
/// let error = PipelineError::PortExhaustion { start: 9000, end: 9001 };
/// assert!(!error.is_transient());
/// ```
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Model call failed: {0}")]
    ModelCall(#[from] ModelCallError),

    #[error("Integration failed: {0}")]
    Integration(String),

    #[error("No free port pair in range {start}-{end}")]
    PortExhaustion { start: u16, end: u16 },

    #[error("{role} process failed to start: {message}")]
    ProcessSpawn { role: String, message: String },

    #[error("Health check against {url} failed after {attempts} attempts")]
    HealthCheckTimeout { url: String, attempts: u32 },

    #[error("Artifact upload failed: {0}")]
    StorageUpload(String),

    #[error("Document extraction failed: {0}")]
    Extraction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable machine-readable name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::ModelCall(_) => "model_call_error",
            Self::Integration(_) => "integration_error",
            Self::PortExhaustion { .. } => "port_exhaustion_error",
            Self::ProcessSpawn { .. } => "process_spawn_error",
            Self::HealthCheckTimeout { .. } => "health_check_timeout_error",
            Self::StorageUpload(_) => "storage_upload_error",
            Self::Extraction(_) => "extraction_error",
            Self::Config(_) => "config_error",
            Self::Database(_) => "database_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Shorthand for a spawn failure of the given role
    pub fn spawn(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            role: role.into(),
            message: message.into(),
        }
    }
}

impl PipelineErrorExt for PipelineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Validation(_) => "Describe the application you want in a few sentences",

            Self::ModelCall(e) => match e {
                ModelCallError::Timeout(_) => "The model took too long to respond. Try again",
                ModelCallError::RateLimited => "Model rate limit reached. Wait and try again",
                ModelCallError::Unavailable(_) => {
                    "Model provider unavailable. Check that Ollama is running"
                }
                ModelCallError::Authentication(_) => "Check the API key for the model provider",
                ModelCallError::EmptyResponse | ModelCallError::Malformed(_) => {
                    "The model returned an unusable answer. Try rephrasing the request"
                }
            },

            Self::Integration(_) => "Could not write the project. Check disk space and permissions",
            Self::PortExhaustion { .. } => "All deployment ports are in use. Stop a deployment first",
            Self::ProcessSpawn { .. } => "The generated service crashed on startup. See its log",
            Self::HealthCheckTimeout { .. } => "The generated backend never became healthy",
            Self::StorageUpload(_) => "Project was saved locally but not uploaded",
            Self::Extraction(_) => "This document type cannot be read. Paste the text instead",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Deployment registry storage failed. Try restarting",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            Self::ModelCall(e) => e.is_transient(),
            _ => false,
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Database(_))
    }
}
