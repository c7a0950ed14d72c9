//! Model reply parsing
//!
//! Replies are cleaned in two steps: reasoning blocks (`<think>...</think>`,
//! emitted by reasoning models such as deepseek-r1) are removed, then the
//! relevant payload is pulled out: a fenced source block for the generators, a
//! JSON object for the analyzer.

use regex::Regex;
use sdk::StructuredRequirements;
use std::sync::OnceLock;

/// Classification of an analyzer reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerReply {
    /// A JSON object with at least one recognised field
    Structured(StructuredRequirements),
    /// No JSON object present
    Raw(String),
    /// A JSON object was present but unusable
    ParseError { text: String, reason: String },
}

fn reasoning_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // An unterminated block swallows the rest of the reply
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<think>.*?(?:</think>|\z)").expect("Invalid reasoning pattern")
    })
}

/// Remove reasoning blocks and surrounding whitespace
pub fn strip_reasoning(text: &str) -> String {
    reasoning_pattern().replace_all(text, "").trim().to_string()
}

/// Extract the body of the first fenced block
///
/// A fence tagged with one of `languages` wins over an untagged or differently
/// tagged one. Without any fence the whole text is returned. An unterminated
/// fence extends to the end of the text.
pub fn extract_code_block(text: &str, languages: &[&str]) -> String {
    let fences = fenced_blocks(text);

    let preferred = fences.iter().find(|(tag, _)| {
        languages
            .iter()
            .any(|lang| tag.eq_ignore_ascii_case(lang))
    });

    match preferred.or_else(|| fences.first()) {
        Some((_, body)) => body.trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// All fenced blocks as (language tag, body) pairs
fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(tag) = trimmed.strip_prefix("```") {
                    current = Some((tag.trim().to_string(), Vec::new()));
                }
            }
            Some((tag, mut body)) => {
                if trimmed.trim_end() == "```" {
                    blocks.push((tag, body.join("\n")));
                } else {
                    body.push(line);
                    current = Some((tag, body));
                }
            }
        }
    }

    if let Some((tag, body)) = current {
        blocks.push((tag, body.join("\n")));
    }

    blocks
}

/// Classify an analyzer reply as structured, raw or unparseable
///
/// The candidate object spans from the first `{` to the last `}`, which also
/// covers objects wrapped in prose or a ```json fence.
pub fn classify_analysis(text: &str) -> AnalyzerReply {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return AnalyzerReply::Raw(text.to_string());
    };

    if end < start {
        return AnalyzerReply::Raw(text.to_string());
    }

    match serde_json::from_str::<StructuredRequirements>(&text[start..=end]) {
        Ok(requirements) if requirements.is_empty() => AnalyzerReply::ParseError {
            text: text.to_string(),
            reason: "object has none of the expected fields".to_string(),
        },
        Ok(requirements) => AnalyzerReply::Structured(requirements),
        Err(e) => AnalyzerReply::ParseError {
            text: text.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Cheap completeness check for generated Python
pub fn looks_like_python_module(source: &str) -> bool {
    source.len() > 100 && source.contains("import") && source.contains("def ")
}

/// Cheap completeness check for a generated React component
pub fn looks_like_component(source: &str) -> bool {
    source.len() > 100
        && (source.contains("function") || source.contains("=>"))
        && source.contains("return")
}
