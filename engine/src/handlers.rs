//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Run the full pipeline for a request
//! - analyze: Run only the analyzer
//! - deploy: Deploy an existing bundle
//! - stop / list: Manage deployments recorded in the database
//! - status: Report daemon, provider and deployment state
//!
//! `run` and `deploy` keep their deployment in the foreground until Ctrl+C
//! unless `--detach` is given.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::daemon::{self, Daemon};
use crate::db::Database;
use crate::integrator;
use crate::llm::router::LLMRouter;
use crate::pipeline::{Pipeline, RunOptions, RunResult};
use crate::preprocess::TextExtractor;
use sdk::{DeploymentRecord, DocumentExcerpt, Request, RequirementsSpec, StopStatus};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Open the database and wire a pipeline that persists to it
async fn open_pipeline(config: &Config) -> Result<(Database, Pipeline)> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;
    let pipeline = Pipeline::from_config(config.clone(), Some(&database))?;
    Ok((database, pipeline))
}

/// Read attachment files into excerpts
fn read_attachments(paths: &[PathBuf], config: &Config) -> Result<Vec<DocumentExcerpt>> {
    let extractor = TextExtractor::from_config(&config.pipeline);
    paths
        .iter()
        .map(|path| -> Result<DocumentExcerpt> {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read attachment {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            Ok(extractor.extract_excerpt(&name, &bytes, None)?)
        })
        .collect()
}

fn build_request(description: String, attachments: &[PathBuf], config: &Config) -> Result<Request> {
    let mut request = Request::new(description);
    request.attachments = read_attachments(attachments, config)?;
    Ok(request)
}

/// Run the full pipeline
pub async fn handle_run(
    description: String,
    attachments: Vec<PathBuf>,
    no_deploy: bool,
    detach: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let request = build_request(description, &attachments, config)?;
    let (database, pipeline) = open_pipeline(config).await?;

    let pipeline = Arc::new(pipeline);
    let result = pipeline
        .run_in_task(request, RunOptions { deploy: !no_deploy })
        .await;

    match format {
        OutputFormat::Text => print_run_result(&result),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    if let Some(error) = &result.error {
        database.close().await.ok();
        anyhow::bail!("Pipeline failed at {}: {}", result.final_stage, error);
    }

    if let Some(record) = &result.deployment {
        hold_or_detach(&pipeline, record, detach, format).await?;
    }

    database.close().await?;
    Ok(())
}

/// Run only the analyzer
pub async fn handle_analyze(
    description: String,
    attachments: Vec<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let request = build_request(description, &attachments, config)?;
    let pipeline = Pipeline::from_config(config.clone(), None)?;
    let spec = pipeline.analyze(&request).await?;

    match format {
        OutputFormat::Text => print_spec(&spec),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&spec)?),
    }
    Ok(())
}

/// Deploy a bundle already on disk
pub async fn handle_deploy(
    bundle_dir: PathBuf,
    detach: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let bundle = integrator::load_bundle(&bundle_dir).await?;
    let (database, pipeline) = open_pipeline(config).await?;

    let record = match pipeline.deployer().deploy_in_task(bundle).await {
        Ok(record) => record,
        Err(failure) => {
            database.close().await.ok();
            let urls = failure.partial_urls();
            if !urls.is_empty() {
                eprintln!("Services that came up: {}", urls.join(", "));
            }
            return Err(failure.error.into());
        }
    };

    match format {
        OutputFormat::Text => print_deployment(&record),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
    }

    hold_or_detach(&pipeline, &record, detach, format).await?;
    database.close().await?;
    Ok(())
}

/// Keep a fresh deployment in the foreground, or hand it off
async fn hold_or_detach(
    pipeline: &Pipeline,
    record: &DeploymentRecord,
    detach: bool,
    format: OutputFormat,
) -> Result<()> {
    let deployer = pipeline.deployer();

    if detach {
        deployer.detach(&record.id).await;
        if let OutputFormat::Text = format {
            println!();
            println!("Deployment left running. Stop it with:");
            println!("  launchpad stop {}", record.id);
        }
        return Ok(());
    }

    if let OutputFormat::Text = format {
        println!();
        println!("Press Ctrl+C to stop.");
    }
    daemon::shutdown_signal().await;
    deployer.stop_all().await;
    Ok(())
}

/// Stop a deployment by ID
pub async fn handle_stop(deployment_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let (database, pipeline) = open_pipeline(config).await?;
    let result = pipeline.stop_deployment(&deployment_id).await?;
    database.close().await?;

    match format {
        OutputFormat::Text => match result.status {
            StopStatus::Stopped => println!("Deployment {} stopped", deployment_id),
            StopStatus::AlreadyStopped => {
                println!("Deployment {} was already stopped", deployment_id)
            }
        },
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}

/// List recorded deployments, newest first
pub async fn handle_list(config: &Config, format: OutputFormat) -> Result<()> {
    let (database, pipeline) = open_pipeline(config).await?;
    let records = pipeline.deployer().list().await?;
    database.close().await?;

    match format {
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No deployments");
                return Ok(());
            }

            println!("Deployments ({}):", records.len());
            println!();
            for record in &records {
                println!("{}  [{}]", record.id, record.status);
                println!("  Bundle:   {}", record.bundle_id);
                println!("  Backend:  {}", record.backend_url);
                println!("  Frontend: {}", record.frontend_url);
                println!(
                    "  Created:  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S")
                );
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "deployments": records,
                "count": records.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Report daemon, provider and deployment state
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let daemon = Daemon::status(config);

    let router = LLMRouter::from_config(&config.llm);
    let providers: Vec<(String, bool)> = router
        .check_health()
        .await
        .into_iter()
        .map(|(name, healthy)| (name.to_string(), healthy))
        .collect();

    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;
    let active = database.deployments().list_active().await?;
    database.close().await?;

    match format {
        OutputFormat::Text => {
            println!("Launchpad v{}", env!("CARGO_PKG_VERSION"));
            println!();
            match daemon.pid {
                Some(pid) => println!("Daemon:      running (PID {})", pid),
                None => println!("Daemon:      not running"),
            }
            for (name, healthy) in &providers {
                let state = if *healthy { "available" } else { "unavailable" };
                println!("Provider:    {} ({})", name, state);
            }
            println!("Deployments: {} active", active.len());
            for stored in &active {
                println!(
                    "  {}  {}  {}",
                    stored.record.id, stored.record.backend_url, stored.record.frontend_url
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "version": env!("CARGO_PKG_VERSION"),
                "daemon": daemon,
                "providers": providers
                    .iter()
                    .map(|(name, healthy)| json!({ "name": name, "healthy": healthy }))
                    .collect::<Vec<_>>(),
                "active_deployments": active.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_run_result(result: &RunResult) {
    println!("Run {}: {}", result.run_id, result.final_stage);
    for report in &result.stages {
        let elapsed = report
            .finished_at
            .map(|end| format!("{}ms", (end - report.started_at).num_milliseconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<20} {:?} (attempts: {}, {})",
            report.stage.as_str(),
            report.status,
            report.attempts,
            elapsed
        );
    }

    if let Some(spec) = &result.spec {
        println!();
        print_spec(spec);
    }
    if let Some(bundle) = &result.bundle {
        println!();
        println!("Project: {}", bundle.root.display());
    }
    if let Some(record) = &result.deployment {
        println!();
        print_deployment(record);
    }
    if let Some(error) = &result.error {
        println!();
        println!("Error: {}", error);
        println!("Hint:  {}", sdk::PipelineErrorExt::user_hint(error));
        if !result.partial_urls.is_empty() {
            println!("Came up before the failure: {}", result.partial_urls.join(", "));
        }
    }
}

fn print_spec(spec: &RequirementsSpec) {
    match spec {
        RequirementsSpec::Structured { requirements, .. } => {
            let sections = [
                ("Purpose", &requirements.purpose),
                ("Audience", &requirements.target_audience),
                ("Features", &requirements.features),
                ("Entities", &requirements.entities),
                ("Endpoints", &requirements.endpoints),
                ("Constraints", &requirements.constraints),
                ("Integrations", &requirements.integration),
            ];
            println!("Requirements:");
            for (title, items) in sections {
                if items.is_empty() {
                    continue;
                }
                println!("  {}:", title);
                for item in items {
                    println!("    - {}", item);
                }
            }
        }
        RequirementsSpec::Raw {
            text, parse_error, ..
        } => {
            println!("Requirements (unstructured):");
            if let Some(reason) = parse_error {
                println!("  ({})", reason);
            }
            for line in text.lines() {
                println!("  {}", line);
            }
        }
    }
}

fn print_deployment(record: &DeploymentRecord) {
    println!("Deployment: {}", record.id);
    println!("  Backend:  {}", record.backend_url);
    println!("  Frontend: {}", record.frontend_url);
    println!("  Logs:     {}", logs_dir(&record.bundle_root).display());
}

fn logs_dir(bundle_root: &Path) -> PathBuf {
    bundle_root.join(".logs")
}
