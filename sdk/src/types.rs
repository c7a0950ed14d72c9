//! Artifact types passed between pipeline stages
//!
//! These are passive records. Data flows strictly forward:
//! `Request -> RequirementsSpec -> CodeArtifact + UiArtifact -> ProjectBundle -> DeploymentRecord`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Pre-extracted text of a document attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentExcerpt {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub text: String,
    #[serde(default)]
    pub truncated: bool,
}

impl DocumentExcerpt {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            text: text.into(),
            truncated: false,
        }
    }
}

/// A natural-language application request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub description: String,
    #[serde(default)]
    pub attachments: Vec<DocumentExcerpt>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            attachments: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, excerpt: DocumentExcerpt) -> Self {
        self.attachments.push(excerpt);
        self
    }

    /// Description followed by every attachment, as sent to the analyzer
    pub fn prompt_text(&self) -> String {
        let mut text = self.description.trim().to_string();
        if !self.attachments.is_empty() {
            text.push_str("\n\nAttached documents:");
            for doc in &self.attachments {
                text.push_str(&format!("\n\n### {}\n{}", doc.name, doc.text));
            }
        }
        text
    }
}

/// Structured requirements as returned by the analyzer model call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRequirements {
    #[serde(default, deserialize_with = "string_or_list")]
    pub purpose: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub target_audience: Vec<String>,
    #[serde(default, alias = "functionalities", deserialize_with = "string_or_list")]
    pub features: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub entities: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub endpoints: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub constraints: Vec<String>,
    #[serde(default, alias = "integrations", deserialize_with = "string_or_list")]
    pub integration: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub domain: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub personality: Vec<String>,
}

impl StructuredRequirements {
    /// True when the model returned an object with none of the known fields
    pub fn is_empty(&self) -> bool {
        self.purpose.is_empty()
            && self.target_audience.is_empty()
            && self.features.is_empty()
            && self.entities.is_empty()
            && self.endpoints.is_empty()
            && self.constraints.is_empty()
            && self.integration.is_empty()
            && self.domain.is_empty()
            && self.personality.is_empty()
    }
}

// Models are inconsistent about scalar vs list values.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(s) if s.trim().is_empty() => Vec::new(),
        serde_json::Value::String(s) => vec![s],
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect(),
        other => vec![other.to_string()],
    })
}

/// What the requested application should do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementsSpec {
    /// The analyzer reply parsed into the structured shape
    Structured {
        description: String,
        requirements: StructuredRequirements,
    },
    /// Degraded variant carrying the analyzer reply verbatim
    Raw {
        description: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_error: Option<String>,
    },
}

impl RequirementsSpec {
    pub fn description(&self) -> &str {
        match self {
            Self::Structured { description, .. } | Self::Raw { description, .. } => description,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// Language and framework of a generated source block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackTag {
    pub language: String,
    pub framework: String,
}

impl StackTag {
    pub fn new(language: impl Into<String>, framework: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            framework: framework.into(),
        }
    }

    pub fn python_fastapi() -> Self {
        Self::new("python", "fastapi")
    }

    pub fn javascript_react() -> Self {
        Self::new("javascript", "react")
    }
}

impl fmt::Display for StackTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.language, self.framework)
    }
}

/// Generated backend source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub stack: StackTag,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl CodeArtifact {
    pub fn new(stack: StackTag, source: impl Into<String>) -> Self {
        Self {
            stack,
            source: source.into(),
            created_at: Utc::now(),
        }
    }
}

/// Generated frontend source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiArtifact {
    pub stack: StackTag,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl UiArtifact {
    pub fn new(stack: StackTag, source: impl Into<String>) -> Self {
        Self {
            stack,
            source: source.into(),
            created_at: Utc::now(),
        }
    }
}

/// The assembled, runnable source tree of a generated application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBundle {
    pub id: String,
    pub root: PathBuf,
    /// Relative path (forward slashes) to file content
    pub files: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl ProjectBundle {
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn backend_dir(&self) -> PathBuf {
        self.root.join("backend")
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.root.join("frontend")
    }

    /// True if at least one non-empty file exists under `prefix/`
    pub fn has_entries_under(&self, prefix: &str) -> bool {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.files
            .iter()
            .any(|(path, content)| path.starts_with(&prefix) && !content.is_empty())
    }
}

/// Lifecycle of a deployment
///
/// `starting -> running -> stopped`, or `starting -> failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Starting,
    Running,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a record in this status still holds its ports
    pub fn holds_ports(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown deployment status '{}'", other)),
        }
    }
}

/// Tracked runtime state of a launched backend and frontend pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub bundle_id: String,
    pub bundle_root: PathBuf,
    pub backend_port: u16,
    pub frontend_port: u16,
    #[serde(default)]
    pub backend_pid: Option<u32>,
    #[serde(default)]
    pub frontend_pid: Option<u32>,
    pub status: DeploymentStatus,
    pub backend_url: String,
    pub frontend_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn ports(&self) -> [u16; 2] {
        [self.backend_port, self.frontend_port]
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResult {
    pub deployment_id: String,
    pub status: StopStatus,
}

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Pending,
    Analyzing,
    GeneratingBackend,
    GeneratingUi,
    Integrating,
    Deploying,
    Complete,
    Failed,
}

impl PipelineStage {
    /// The stages that do work, in execution order
    pub const WORK_STAGES: [PipelineStage; 5] = [
        PipelineStage::Analyzing,
        PipelineStage::GeneratingBackend,
        PipelineStage::GeneratingUi,
        PipelineStage::Integrating,
        PipelineStage::Deploying,
    ];

    /// Next stage on success; terminal stages map to themselves
    pub fn next(self) -> Self {
        match self {
            Self::Pending => Self::Analyzing,
            Self::Analyzing => Self::GeneratingBackend,
            Self::GeneratingBackend => Self::GeneratingUi,
            Self::GeneratingUi => Self::Integrating,
            Self::Integrating => Self::Deploying,
            Self::Deploying => Self::Complete,
            Self::Complete => Self::Complete,
            Self::Failed => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Analyzing => "ANALYZING",
            Self::GeneratingBackend => "GENERATING_BACKEND",
            Self::GeneratingUi => "GENERATING_UI",
            Self::Integrating => "INTEGRATING",
            Self::Deploying => "DEPLOYING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Running,
    Succeeded,
    Failed,
}

/// Per-stage bookkeeping of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
