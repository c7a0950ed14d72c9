//! Stage agents
//!
//! Each agent is a function from its input artifact(s) and a `StageContext` to
//! its output artifact. The context carries the model client and the limits
//! the stage runs under, so tests can swap in a scripted client without
//! touching the orchestrator.

use crate::config::{Config, PipelineConfig};
use crate::llm::{Completion, ModelClient, ModelRequest};
use sdk::errors::{ModelCallError, PipelineError};
use std::time::{Duration, Instant};

pub mod analyzer;
pub mod backend;
pub mod frontend;
pub mod response;

pub use analyzer::analyze;
pub use backend::generate_backend;
pub use frontend::generate_ui;

/// Everything a stage needs besides its input artifacts
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub model: &'a dyn ModelClient,
    /// Budget for a single model call
    pub timeout: Duration,
    pub temperature: f32,
    pub max_request_chars: usize,
    /// Re-ask once when a generated source block looks truncated
    pub completeness_retry: bool,
}

impl<'a> StageContext<'a> {
    pub fn new(model: &'a dyn ModelClient, pipeline: &PipelineConfig, temperature: f32) -> Self {
        Self {
            model,
            timeout: pipeline.stage_timeout(),
            temperature,
            max_request_chars: pipeline.max_request_chars,
            completeness_retry: pipeline.completeness_retry,
        }
    }

    pub fn from_config(model: &'a dyn ModelClient, config: &Config) -> Self {
        Self::new(model, &config.pipeline, config.llm.temperature)
    }
}

/// Issue one model call under the stage timeout
///
/// Returns the reply with reasoning blocks removed. An empty reply is an error.
pub(crate) async fn call_model(
    ctx: &StageContext<'_>,
    stage: &str,
    request: ModelRequest,
) -> Result<Completion, PipelineError> {
    let start = Instant::now();
    let result = tokio::time::timeout(ctx.timeout, ctx.model.complete(&request)).await;

    let completion = match result {
        Ok(Ok(completion)) => completion,
        Ok(Err(e)) => {
            tracing::warn!(stage, error = %e, "Model call failed");
            return Err(e.into_call_error(ctx.timeout).into());
        }
        Err(_) => {
            tracing::warn!(stage, timeout_secs = ctx.timeout.as_secs(), "Model call timed out");
            return Err(ModelCallError::Timeout(ctx.timeout.as_secs()).into());
        }
    };

    let content = response::strip_reasoning(&completion.content);
    tracing::info!(
        stage,
        provider = %completion.provider,
        chars = content.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Model call completed"
    );

    if content.is_empty() {
        return Err(ModelCallError::EmptyResponse.into());
    }

    Ok(Completion {
        content,
        provider: completion.provider,
    })
}
