//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for the language-model providers the
//! pipeline stages call (Ollama and OpenAI-compatible APIs). The `LLMProvider`
//! trait is the per-backend contract; `ModelClient` is the seam the stage agents
//! depend on, implemented by the `LLMRouter` in production and by scripted
//! clients in tests.

use async_trait::async_trait;
use sdk::errors::ModelCallError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod ollama;
pub mod openai;
pub mod router;

pub use router::LLMRouter;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Map into the pipeline taxonomy; `timeout` is the budget the call ran under
    pub fn into_call_error(self, timeout: Duration) -> ModelCallError {
        match self {
            Self::Timeout => ModelCallError::Timeout(timeout.as_secs()),
            Self::RateLimitExceeded => ModelCallError::RateLimited,
            Self::AuthenticationFailed(msg) => ModelCallError::Authentication(msg),
            Self::ParseError(msg) => ModelCallError::Malformed(msg),
            Self::ProviderUnavailable(msg)
            | Self::InvalidRequest(msg)
            | Self::NetworkError(msg) => ModelCallError::Unavailable(msg),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Sampling options forwarded to the provider
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
}

impl GenerationOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
        }
    }
}

/// One model call: the conversation plus sampling options
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
}

impl ModelRequest {
    /// System prompt followed by a single user turn
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(prompt)],
            options: GenerationOptions::default(),
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    /// Content of the last user message
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Text returned by a model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    /// Name of the provider that answered
    pub provider: String,
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Generate a completion for the conversation
    async fn generate(&self, messages: &[Message], options: &GenerationOptions) -> Result<String>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// The model seam the pipeline stages call through
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<Completion>;
}
