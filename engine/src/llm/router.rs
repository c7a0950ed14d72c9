//! LLM Router
//!
//! Holds the configured providers in preference order and fails over between
//! them. The configured default provider is always tried first.
//!
//! When every provider fails, the error of the preferred provider is returned
//! so its classification (timeout, rate limit) still drives the orchestrator's
//! retry decision.

use super::{Completion, LLMError, LLMProvider, ModelClient, ModelRequest};
use crate::config::LLMConfig;
use async_trait::async_trait;

use super::ollama::OllamaProvider;
use super::openai::OpenAIProvider;

/// LLM Router with ordered failover
pub struct LLMRouter {
    /// Available LLM providers, preferred first
    providers: Vec<Box<dyn LLMProvider>>,
}

impl LLMRouter {
    /// Create a new LLM router
    ///
    /// # Arguments
    /// * `providers` - List of available LLM providers
    /// * `default_provider` - Name of the provider to try first
    pub fn new(mut providers: Vec<Box<dyn LLMProvider>>, default_provider: &str) -> Self {
        // Stable sort keeps the given order among the non-default providers
        providers.sort_by_key(|p| p.name() != default_provider);
        Self { providers }
    }

    /// Build the router from configuration
    ///
    /// Ollama is always registered. The OpenAI-compatible provider is registered
    /// when it is the default or when its API key is present.
    pub fn from_config(config: &LLMConfig) -> Self {
        let mut providers: Vec<Box<dyn LLMProvider>> = vec![Box::new(OllamaProvider::new(
            &config.ollama.base_url,
            &config.ollama.model,
        ))];

        let openai = OpenAIProvider::from_env(config.openai.clone());
        if openai.has_api_key() || config.default_provider == "openai" {
            providers.push(Box::new(openai));
        }

        Self::new(providers, &config.default_provider)
    }

    /// Provider names in the order they are tried
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Call providers in order until one succeeds
    pub async fn call(&self, request: &ModelRequest) -> super::Result<Completion> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        let mut first_error: Option<LLMError> = None;

        for provider in &self.providers {
            tracing::debug!("Attempting provider: {}", provider.name());

            match provider.generate(&request.messages, &request.options).await {
                Ok(content) => {
                    tracing::info!("Provider {} succeeded", provider.name());
                    return Ok(Completion {
                        content,
                        provider: provider.name().to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        Err(first_error.unwrap_or_else(|| {
            LLMError::ProviderUnavailable("All LLM providers failed".to_string())
        }))
    }

    /// Check the health of all registered providers
    /// Returns a list of (provider_name, is_healthy)
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), is_healthy));
        }
        results
    }
}

#[async_trait]
impl ModelClient for LLMRouter {
    async fn complete(&self, request: &ModelRequest) -> super::Result<Completion> {
        self.call(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationOptions, Message};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // Mock provider for testing
    struct MockProvider {
        name: String,
        reply: std::result::Result<String, fn() -> LLMError>,
        calls: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn ok(name: &str, reply: &str, calls: Arc<AtomicUsize>) -> Self {
            Self {
                name: name.to_string(),
                reply: Ok(reply.to_string()),
                calls,
            }
        }

        fn failing(name: &str, error: fn() -> LLMError, calls: Arc<AtomicUsize>) -> Self {
            Self {
                name: name.to_string(),
                reply: Err(error),
                calls,
            }
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_local(&self) -> bool {
            self.name == "ollama"
        }

        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> super::super::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn request() -> ModelRequest {
        ModelRequest::new("system", "prompt")
    }

    #[test]
    fn test_default_provider_is_tried_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::ok("ollama", "a", Arc::clone(&calls))),
                Box::new(MockProvider::ok("openai", "b", Arc::clone(&calls))),
            ],
            "openai",
        );

        assert_eq!(router.provider_names(), vec!["openai", "ollama"]);
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::failing(
                    "ollama",
                    || LLMError::ProviderUnavailable("down".into()),
                    Arc::clone(&calls),
                )),
                Box::new(MockProvider::ok("openai", "answer", Arc::clone(&calls))),
            ],
            "ollama",
        );

        let completion = router.call(&request()).await.unwrap();
        assert_eq!(completion.content, "answer");
        assert_eq!(completion.provider, "openai");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_failed_returns_preferred_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::failing(
                    "ollama",
                    || LLMError::RateLimitExceeded,
                    Arc::clone(&calls),
                )),
                Box::new(MockProvider::failing(
                    "openai",
                    || LLMError::AuthenticationFailed("no key".into()),
                    Arc::clone(&calls),
                )),
            ],
            "ollama",
        );

        let err = router.call(&request()).await.unwrap_err();
        assert!(matches!(err, LLMError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn test_no_providers() {
        let router = LLMRouter::new(vec![], "ollama");
        let err = router.call(&request()).await.unwrap_err();
        assert!(matches!(err, LLMError::ProviderUnavailable(_)));
    }
}
