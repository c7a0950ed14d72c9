//! Requirements Analyzer stage
//!
//! Turns a `Request` into a `RequirementsSpec`. The model is asked for a JSON
//! object; a reply that does not parse degrades to the raw-text variant rather
//! than failing the run.

use super::response::{classify_analysis, AnalyzerReply};
use super::{call_model, StageContext};
use crate::llm::ModelRequest;
use sdk::errors::PipelineError;
use sdk::{Request, RequirementsSpec};

const SYSTEM_PROMPT: &str = "You are a requirements analyst for small web applications. \
Read the user's request and answer with a single JSON object and nothing else.";

const SHAPE: &str = r#"{
  "purpose": ["what the application is for"],
  "target_audience": ["who uses it"],
  "functionalities": ["user-visible features"],
  "entities": ["data entities, e.g. Room, Booking"],
  "endpoints": ["HTTP endpoints as 'METHOD /path - purpose'"],
  "constraints": ["technical or business constraints"],
  "integration": ["external systems to talk to"],
  "domain": ["business domain"],
  "personality": ["tone, if the app talks to users"]
}"#;

/// Run the analyzer stage
pub async fn analyze(
    request: &Request,
    ctx: &StageContext<'_>,
) -> Result<RequirementsSpec, PipelineError> {
    let description = validated_description(request, ctx.max_request_chars)?;

    let mut bounded = request.clone();
    bounded.description = description.clone();

    let prompt = format!(
        "Analyze this application request and extract its requirements.\n\n\
         Request:\n{}\n\n\
         Answer with JSON in exactly this shape (every value is a list of strings):\n{}",
        bounded.prompt_text(),
        SHAPE
    );

    let completion = call_model(
        ctx,
        "analyze",
        ModelRequest::new(SYSTEM_PROMPT, prompt).temperature(ctx.temperature),
    )
    .await?;

    Ok(match classify_analysis(&completion.content) {
        AnalyzerReply::Structured(requirements) => {
            tracing::info!(
                features = requirements.features.len(),
                entities = requirements.entities.len(),
                endpoints = requirements.endpoints.len(),
                "Requirements parsed"
            );
            RequirementsSpec::Structured {
                description,
                requirements,
            }
        }
        AnalyzerReply::Raw(text) => {
            tracing::warn!("Analyzer reply has no JSON object, continuing with raw text");
            RequirementsSpec::Raw {
                description,
                text,
                parse_error: None,
            }
        }
        AnalyzerReply::ParseError { text, reason } => {
            tracing::warn!(%reason, "Analyzer reply did not parse, continuing with raw text");
            RequirementsSpec::Raw {
                description,
                text,
                parse_error: Some(reason),
            }
        }
    })
}

/// Trimmed description, truncated to `max_chars` characters
fn validated_description(request: &Request, max_chars: usize) -> Result<String, PipelineError> {
    let description = request.description.trim();
    if description.is_empty() {
        return Err(PipelineError::Validation(
            "request description is empty".to_string(),
        ));
    }

    let length = description.chars().count();
    if length > max_chars {
        tracing::warn!(length, max_chars, "Request description truncated");
        return Ok(description.chars().take(max_chars).collect());
    }

    Ok(description.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_description_is_validation_error() {
        let err = validated_description(&Request::new("   \n"), 100).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_long_description_is_truncated_on_char_boundary() {
        let request = Request::new("é".repeat(20));
        let description = validated_description(&request, 5).unwrap();
        assert_eq!(description, "ééééé");
    }
}
