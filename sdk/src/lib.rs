//! Launchpad SDK
//!
//! Shared artifact types and the error taxonomy used by the engine, its
//! HTTP API and anything embedding the pipeline.

/// Error types and handling
pub mod errors;

/// Artifact and pipeline types
pub mod types;

// Re-export commonly used types
pub use errors::{ModelCallError, PipelineError, PipelineErrorExt};
pub use types::{
    CodeArtifact, DeploymentRecord, DeploymentStatus, DocumentExcerpt, PipelineStage,
    ProjectBundle, Request, RequirementsSpec, StackTag, StageReport, StageStatus, StopResult,
    StopStatus, StructuredRequirements, UiArtifact,
};
