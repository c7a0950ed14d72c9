//! Integration tests for the pipeline orchestrator
//!
//! Runs whole requests through `Pipeline::run` against a scripted model:
//! - stage ordering and per-stage reports
//! - degraded (unstructured) analysis
//! - timeout and retry behaviour of model-backed stages
//! - full runs through deployment, using `launchpad serve-static` as backend

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{Reply, ScriptedModel, ANALYZER, BACKEND, FRONTEND};
use launchpad_engine::config::Config;
use launchpad_engine::deployer::{Deployer, DeploymentRegistry};
use launchpad_engine::integrator::Integrator;
use launchpad_engine::llm::LLMError;
use launchpad_engine::pipeline::{Pipeline, RunOptions, RunStatus};
use sdk::{
    ModelCallError, PipelineError, PipelineStage, Request, RequirementsSpec, StageStatus,
    StopStatus,
};

fn pipeline(config: Config, model: Arc<ScriptedModel>) -> Pipeline {
    let integrator = Integrator::new(config.core.projects_dir.clone());
    let registry = Arc::new(DeploymentRegistry::new(&config.deploy));
    let deployer = Arc::new(Deployer::new(config.deploy.clone(), registry));
    Pipeline::new(config, model, integrator, deployer)
}

const NO_DEPLOY: RunOptions = RunOptions { deploy: false };

/// Config deploying onto two free ports with `backend` as the backend command
fn deploy_config(dir: &Path, from: u16, backend: &[&str]) -> Config {
    let mut config = common::test_config(dir);
    let (start, end) = common::free_range(from, 2);
    config.deploy.port_range_start = start;
    config.deploy.port_range_end = end;
    config.deploy.backend_command = common::command(backend);
    config.deploy.health_attempts = 50;
    config
}

fn deploying_pipeline(config: Config, model: Arc<ScriptedModel>) -> Arc<Pipeline> {
    let integrator = Integrator::new(config.core.projects_dir.clone());
    let registry = Arc::new(DeploymentRegistry::new(&config.deploy));
    let deployer = Deployer::new(config.deploy.clone(), registry)
        .with_self_exe(PathBuf::from(env!("CARGO_BIN_EXE_launchpad")));
    Arc::new(Pipeline::new(config, model, integrator, Arc::new(deployer)))
}

const SERVE_STATIC: [&str; 8] = [
    "{self}",
    "serve-static",
    "--dir",
    "{dir}",
    "--host",
    "{host}",
    "--port",
    "{port}",
];

#[tokio::test]
async fn test_stages_run_in_order() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::happy());
    let pipeline = pipeline(common::test_config(dir.path()), model.clone());

    let result = pipeline
        .run(&Request::new("A todo list with a REST API"), NO_DEPLOY)
        .await;

    assert!(result.is_success(), "run failed: {:?}", result.error);
    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.final_stage, PipelineStage::Complete);

    let stages: Vec<PipelineStage> = result.stages.iter().map(|r| r.stage).collect();
    assert_eq!(stages, PipelineStage::WORK_STAGES[..4].to_vec());

    for report in &result.stages {
        assert_eq!(report.status, StageStatus::Succeeded);
        assert_eq!(report.attempts, 1);
        assert!(report.finished_at.unwrap() >= report.started_at);
    }
    for pair in result.stages.windows(2) {
        assert!(pair[0].finished_at.unwrap() < pair[1].finished_at.unwrap());
    }

    match result.spec.as_ref().unwrap() {
        RequirementsSpec::Structured { requirements, .. } => {
            assert!(requirements.features.contains(&"add todo".to_string()));
            assert_eq!(requirements.entities, vec!["Todo".to_string()]);
        }
        other => panic!("expected structured requirements, got {:?}", other),
    }

    let bundle = result.bundle.as_ref().unwrap();
    assert_eq!(bundle.file("backend/app.py"), Some(common::backend_source()));
    assert_eq!(bundle.file("frontend/App.jsx"), Some(common::ui_source()));
    assert!(bundle.root.join("backend/app.py").exists());
    assert!(bundle.root.starts_with(dir.path().join("projects")));
    assert!(result.deployment.is_none());

    assert_eq!(model.calls(ANALYZER), 1);
    assert_eq!(model.calls(BACKEND), 1);
    assert_eq!(model.calls(FRONTEND), 1);
}

#[tokio::test]
async fn test_unstructured_analysis_still_generates_code() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(
        ScriptedModel::happy().then(
            ANALYZER,
            Reply::text("Users want to keep a list of todos and tick them off."),
        ),
    );
    let pipeline = pipeline(common::test_config(dir.path()), model.clone());

    let result = pipeline.run(&Request::new("todo app"), NO_DEPLOY).await;

    assert!(result.is_success(), "run failed: {:?}", result.error);
    match result.spec.as_ref().unwrap() {
        RequirementsSpec::Raw {
            text, parse_error, ..
        } => {
            assert!(text.contains("tick them off"));
            assert!(parse_error.is_none());
        }
        other => panic!("expected raw requirements, got {:?}", other),
    }
    assert_eq!(model.calls(BACKEND), 1);
    assert!(result.backend.is_some());
}

#[tokio::test]
async fn test_stage_timeout_stops_the_run() {
    let dir = TempDir::new().unwrap();
    let mut config = common::test_config(dir.path());
    config.pipeline.stage_timeout_secs = 1;

    let model = Arc::new(
        ScriptedModel::happy()
            .then(BACKEND, Reply::Hang)
            .then(BACKEND, Reply::Hang),
    );
    let pipeline = pipeline(config, model.clone());

    let result = pipeline.run(&Request::new("todo app"), NO_DEPLOY).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.final_stage, PipelineStage::GeneratingBackend);
    assert!(matches!(
        result.error,
        Some(PipelineError::ModelCall(ModelCallError::Timeout(1)))
    ));
    assert!(result.spec.is_some());
    assert!(result.backend.is_none());
    assert!(result.ui.is_none());
    assert!(result.bundle.is_none());

    // Timeouts are transient: one retry, then give up
    assert_eq!(model.calls(BACKEND), 2);
    assert_eq!(model.calls(FRONTEND), 0);
    let last = result.stages.last().unwrap();
    assert_eq!(last.stage, PipelineStage::GeneratingBackend);
    assert_eq!(last.status, StageStatus::Failed);
    assert_eq!(last.attempts, 2);
    assert!(last.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(
        ScriptedModel::happy().then(ANALYZER, Reply::Error(LLMError::RateLimitExceeded)),
    );
    let pipeline = pipeline(common::test_config(dir.path()), model.clone());

    let result = pipeline.run(&Request::new("todo app"), NO_DEPLOY).await;

    assert!(result.is_success(), "run failed: {:?}", result.error);
    assert_eq!(model.calls(ANALYZER), 2);
    assert_eq!(result.stages[0].stage, PipelineStage::Analyzing);
    assert_eq!(result.stages[0].attempts, 2);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::happy().then(
        FRONTEND,
        Reply::Error(LLMError::AuthenticationFailed("bad key".into())),
    ));
    let pipeline = pipeline(common::test_config(dir.path()), model.clone());

    let result = pipeline.run(&Request::new("todo app"), NO_DEPLOY).await;

    assert_eq!(result.final_stage, PipelineStage::GeneratingUi);
    assert!(matches!(
        result.error,
        Some(PipelineError::ModelCall(ModelCallError::Authentication(_)))
    ));
    assert_eq!(model.calls(FRONTEND), 1);
    assert!(result.backend.is_some());
    assert!(result.bundle.is_none());
}

#[tokio::test]
async fn test_empty_request_fails_validation() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::happy());
    let pipeline = pipeline(common::test_config(dir.path()), model.clone());

    let result = pipeline.run(&Request::new("   \n"), NO_DEPLOY).await;

    assert_eq!(result.final_stage, PipelineStage::Analyzing);
    assert!(matches!(result.error, Some(PipelineError::Validation(_))));
    assert_eq!(model.calls(ANALYZER), 0);
    assert!(result.spec.is_none());
}

#[tokio::test]
async fn test_truncated_backend_is_requested_again() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(
        ScriptedModel::happy().then(BACKEND, Reply::text("```python\nfrom fastapi import\n```")),
    );
    let pipeline = pipeline(common::test_config(dir.path()), model.clone());

    let result = pipeline.run(&Request::new("todo app"), NO_DEPLOY).await;

    assert!(result.is_success(), "run failed: {:?}", result.error);
    assert_eq!(model.calls(BACKEND), 2);
    assert_eq!(
        result.backend.as_ref().unwrap().source,
        common::backend_source()
    );
    // The completeness re-ask happens inside one stage attempt
    assert_eq!(result.stages[1].attempts, 1);
}

#[tokio::test]
async fn test_failed_run_serializes_stage_and_error() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new().always(ANALYZER, common::analyzer_reply()));
    let pipeline = pipeline(common::test_config(dir.path()), model);

    let result = pipeline.run(&Request::new("todo app"), NO_DEPLOY).await;
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["status"], "failed");
    assert_eq!(value["final_stage"], "GENERATING_BACKEND");
    assert_eq!(value["error"]["kind"], "model_call_error");
    assert!(value["error"]["hint"].as_str().unwrap().len() > 0);
    assert_eq!(value["stages"].as_array().unwrap().len(), 2);
    assert!(value["bundle"].is_null());
}

#[tokio::test]
async fn test_full_run_deploys_both_services() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::happy());
    let config = deploy_config(dir.path(), 46200, &SERVE_STATIC);
    let pipeline = deploying_pipeline(config, model);

    let result = pipeline
        .run_in_task(
            Request::new("Create a hotel booking chatbot"),
            RunOptions::default(),
        )
        .await;

    assert!(result.is_success(), "run failed: {:?}", result.error);
    assert_eq!(result.final_stage, PipelineStage::Complete);
    let stages: Vec<PipelineStage> = result.stages.iter().map(|r| r.stage).collect();
    assert_eq!(stages, PipelineStage::WORK_STAGES.to_vec());
    for pair in result.stages.windows(2) {
        assert!(pair[0].finished_at.unwrap() < pair[1].finished_at.unwrap());
    }
    assert!(result.partial_urls.is_empty());

    let record = result.deployment.as_ref().unwrap();
    assert_eq!(record.bundle_id, result.bundle.as_ref().unwrap().id);
    assert_ne!(record.backend_port, record.frontend_port);
    assert_ne!(record.backend_url, record.frontend_url);

    let health = reqwest::Client::new()
        .get(format!("{}/health", record.backend_url))
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);

    let stop = pipeline.stop_deployment(&record.id).await.unwrap();
    assert_eq!(stop.status, StopStatus::Stopped);
    let again = pipeline.stop_deployment(&record.id).await.unwrap();
    assert_eq!(again.status, StopStatus::AlreadyStopped);
}

#[tokio::test]
async fn test_deploy_failure_keeps_artifacts_and_partial_urls() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::happy());
    let config = deploy_config(
        dir.path(),
        46400,
        &["sh", "-c", "echo 'address already in use' >&2; exit 1"],
    );
    let frontend_port = config.deploy.port_range_start + 1;
    let pipeline = deploying_pipeline(config, model);

    let result = pipeline
        .run_full_pipeline(&Request::new("Create a hotel booking chatbot"))
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.final_stage, PipelineStage::Deploying);
    match result.error.as_ref().unwrap() {
        PipelineError::ProcessSpawn { role, message } => {
            assert_eq!(role, "backend");
            assert!(message.contains("address already in use"), "{}", message);
        }
        other => panic!("expected spawn failure, got {:?}", other),
    }

    assert!(result.spec.is_some());
    assert!(result.backend.is_some());
    assert!(result.ui.is_some());
    assert!(result.bundle.is_some());
    assert!(result.deployment.is_none());

    // The frontend was up, the backend never was
    assert_eq!(
        result.partial_urls,
        vec![format!("http://127.0.0.1:{}", frontend_port)]
    );

    let last = result.stages.last().unwrap();
    assert_eq!(last.stage, PipelineStage::Deploying);
    assert_eq!(last.status, StageStatus::Failed);

    assert_eq!(pipeline.deployer().registry().active_count(), 0);
    let ports = pipeline.deployer().registry().allocate().unwrap();
    pipeline.deployer().registry().release(ports);
}
