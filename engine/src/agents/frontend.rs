//! UI Generation stage
//!
//! Produces the frontend `UiArtifact` (a single React component) from the
//! requirements and the generated backend, so the UI calls the routes the
//! backend actually exposes.

use super::response::{extract_code_block, looks_like_component};
use super::{call_model, StageContext};
use crate::llm::ModelRequest;
use regex::Regex;
use sdk::errors::{ModelCallError, PipelineError};
use sdk::{CodeArtifact, RequirementsSpec, StackTag, UiArtifact};
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You are a senior frontend engineer. \
You write a single self-contained React component and reply with code only.";

/// Run the UI generation stage
pub async fn generate_ui(
    spec: &RequirementsSpec,
    backend: &CodeArtifact,
    ctx: &StageContext<'_>,
) -> Result<UiArtifact, PipelineError> {
    let prompt = ui_prompt(spec, backend);

    let first = request_source(ctx, &prompt, ctx.temperature).await?;
    let source = if ctx.completeness_retry && !looks_like_component(&first) {
        tracing::warn!(chars = first.len(), "UI source looks incomplete, asking again");
        match request_source(ctx, &prompt, ctx.temperature / 2.0).await {
            Ok(second) if looks_like_component(&second) || second.len() > first.len() => second,
            Ok(_) => first,
            Err(e) => {
                tracing::warn!(error = %e, "Second UI attempt failed, keeping the first");
                first
            }
        }
    } else {
        first
    };

    Ok(UiArtifact::new(StackTag::javascript_react(), source))
}

async fn request_source(
    ctx: &StageContext<'_>,
    prompt: &str,
    temperature: f32,
) -> Result<String, PipelineError> {
    let completion = call_model(
        ctx,
        "generate_ui",
        ModelRequest::new(SYSTEM_PROMPT, prompt).temperature(temperature),
    )
    .await?;

    let source = extract_code_block(
        &completion.content,
        &["jsx", "javascript", "js", "tsx", "react"],
    );
    if source.is_empty() {
        return Err(ModelCallError::EmptyResponse.into());
    }
    Ok(source)
}

fn route_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"@\w+\.(get|post|put|patch|delete)\(\s*["']([^"']+)["']"#)
            .expect("Invalid route pattern")
    })
}

/// Routes declared by a FastAPI source, as "METHOD /path"
pub fn declared_routes(source: &str) -> Vec<String> {
    route_pattern()
        .captures_iter(source)
        .map(|caps| format!("{} {}", caps[1].to_uppercase(), &caps[2]))
        .collect()
}

fn ui_prompt(spec: &RequirementsSpec, backend: &CodeArtifact) -> String {
    let features = match spec {
        RequirementsSpec::Structured { requirements, .. } if !requirements.features.is_empty() => {
            requirements
                .features
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        }
        RequirementsSpec::Structured { .. } => "- derive them from the request".to_string(),
        RequirementsSpec::Raw { text, .. } => text.clone(),
    };

    let routes = declared_routes(&backend.source);
    let routes = if routes.is_empty() {
        "(no routes detected; infer them from the request)".to_string()
    } else {
        routes.join("\n")
    };

    format!(
        "Request: {}\n\nFeatures:\n{}\n\nBackend routes ({}):\n{}\n\n\
         Write one React function component named App:\n\
         - use React hooks from the global `React` object (no imports)\n\
         - call the backend with axios using `window.API_BASE_URL` as the base URL\n\
         - style with Tailwind CSS classes\n\
         - handle loading and error states\n\
         - end with `ReactDOM.createRoot(document.getElementById('root')).render(<App />);`\n\
         Do not include explanations.",
        spec.description(),
        features,
        backend.stack,
        routes
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_routes() {
        let source = r#"
@app.get("/health")
def health(): ...

@app.post('/bookings')
def create(): ...

@router.delete("/bookings/{booking_id}")
def delete(): ...
"#;
        assert_eq!(
            declared_routes(source),
            vec!["GET /health", "POST /bookings", "DELETE /bookings/{booking_id}"]
        );
    }

    #[test]
    fn test_prompt_lists_backend_routes() {
        let spec = RequirementsSpec::Raw {
            description: "hotel bot".to_string(),
            text: "rooms".to_string(),
            parse_error: None,
        };
        let backend = CodeArtifact::new(
            StackTag::python_fastapi(),
            "@app.get(\"/rooms\")\ndef rooms(): return []",
        );
        let prompt = ui_prompt(&spec, &backend);
        assert!(prompt.contains("GET /rooms"));
        assert!(prompt.contains("python/fastapi"));
    }
}
