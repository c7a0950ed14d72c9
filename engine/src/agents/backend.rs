//! Code Generation stage
//!
//! Produces the backend `CodeArtifact` (Python / FastAPI) from the requirements.
//! The source is not validated; a reply that looks truncated is re-asked once
//! at a lower temperature when `completeness_retry` is enabled.

use super::response::{extract_code_block, looks_like_python_module};
use super::{call_model, StageContext};
use crate::llm::ModelRequest;
use sdk::errors::{ModelCallError, PipelineError};
use sdk::{CodeArtifact, RequirementsSpec, StackTag};

const SYSTEM_PROMPT: &str = "You are a senior Python backend engineer. \
You write complete, runnable single-file FastAPI services and reply with code only.";

/// Run the code generation stage
pub async fn generate_backend(
    spec: &RequirementsSpec,
    ctx: &StageContext<'_>,
) -> Result<CodeArtifact, PipelineError> {
    let prompt = backend_prompt(spec);

    let first = request_source(ctx, &prompt, ctx.temperature).await?;
    let source = if ctx.completeness_retry && !looks_like_python_module(&first) {
        tracing::warn!(chars = first.len(), "Backend source looks incomplete, asking again");
        match request_source(ctx, &prompt, ctx.temperature / 2.0).await {
            Ok(second) if looks_like_python_module(&second) || second.len() > first.len() => {
                second
            }
            Ok(_) => first,
            Err(e) => {
                tracing::warn!(error = %e, "Second backend attempt failed, keeping the first");
                first
            }
        }
    } else {
        first
    };

    Ok(CodeArtifact::new(StackTag::python_fastapi(), source))
}

async fn request_source(
    ctx: &StageContext<'_>,
    prompt: &str,
    temperature: f32,
) -> Result<String, PipelineError> {
    let completion = call_model(
        ctx,
        "generate_backend",
        ModelRequest::new(SYSTEM_PROMPT, prompt).temperature(temperature),
    )
    .await?;

    let source = extract_code_block(&completion.content, &["python", "py"]);
    if source.is_empty() {
        return Err(ModelCallError::EmptyResponse.into());
    }
    Ok(source)
}

fn backend_prompt(spec: &RequirementsSpec) -> String {
    let requirements = match spec {
        RequirementsSpec::Structured {
            description,
            requirements,
        } => format!(
            "Request: {}\n\nStructured requirements:\n{}",
            description,
            serde_json::to_string_pretty(requirements).unwrap_or_default()
        ),
        RequirementsSpec::Raw {
            description, text, ..
        } => format!("Request: {}\n\nAnalyst notes:\n{}", description, text),
    };

    format!(
        "{}\n\n\
         Write the backend as one Python file named app.py:\n\
         - FastAPI application object named `app`\n\
         - a `GET /health` route returning {{\"status\": \"ok\"}} with HTTP 200\n\
         - Pydantic models for request and response bodies\n\
         - SQLAlchemy with SQLite for persistence when data must be stored\n\
         - CORS enabled for all origins so a separate frontend can call it\n\
         - JSON responses and proper HTTP error codes\n\
         Do not include tests, frontend code or explanations.",
        requirements
    )
}
