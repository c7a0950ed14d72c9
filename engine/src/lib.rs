//! Launchpad Engine Library
//!
//! Request analysis, code generation, bundle integration and local
//! deployment. Used by the `launchpad` binary and by integration tests.

/// Stage agents (analyzer, backend and UI generators)
pub mod agents;

/// HTTP API and static file server
pub mod api;

/// Configuration management module
pub mod config;

/// Daemon lifecycle management module
pub mod daemon;

/// Database persistence module
pub mod db;

/// Process deployment and the port registry
pub mod deployer;

/// Bundle assembly and artifact upload
pub mod integrator;

/// LLM provider abstraction layer
pub mod llm;

/// Pipeline orchestration
pub mod pipeline;

/// Document text extraction
pub mod preprocess;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
