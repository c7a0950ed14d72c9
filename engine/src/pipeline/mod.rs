//! Pipeline Orchestrator
//!
//! Drives one request through the fixed stage order
//! `ANALYZING -> GENERATING_BACKEND -> GENERATING_UI -> INTEGRATING -> DEPLOYING`
//! and reports a stage-tagged `RunResult`. Every model-backed stage gets one
//! automatic retry on transient errors. The orchestrator owns no shared
//! resources; the deployment registry lives in the `Deployer`.

use crate::agents::{self, StageContext};
use crate::config::Config;
use crate::db::{Database, DeploymentRepository};
use crate::deployer::{DeployFailure, Deployer, DeploymentRegistry};
use crate::integrator::{self, Integrator};
use crate::llm::{LLMRouter, ModelClient};
use sdk::errors::{PipelineError, PipelineErrorExt};
use sdk::{
    CodeArtifact, DeploymentRecord, PipelineStage, ProjectBundle, Request, RequirementsSpec,
    StageReport, StopResult, UiArtifact,
};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::Instrument;

pub mod retry;
pub mod state;

pub use retry::with_single_retry;
pub use state::PipelineRun;

/// Terminal verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Failed,
}

/// Options for `Pipeline::run`
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Stop after INTEGRATING when false
    pub deploy: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { deploy: true }
    }
}

/// Serializable view of a `PipelineError`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    pub hint: String,
}

impl From<&PipelineError> for ErrorBody {
    fn from(error: &PipelineError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            hint: error.user_hint().to_string(),
        }
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<PipelineError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    error.as_ref().map(ErrorBody::from).serialize(serializer)
}

/// Everything a run produced, up to the point where it stopped
#[derive(Debug, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    /// `COMPLETE` on success, the failing stage otherwise
    pub final_stage: PipelineStage,
    pub spec: Option<RequirementsSpec>,
    pub backend: Option<CodeArtifact>,
    pub ui: Option<UiArtifact>,
    pub bundle: Option<ProjectBundle>,
    pub deployment: Option<DeploymentRecord>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<PipelineError>,
    /// URLs that came up before a deployment failed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partial_urls: Vec<String>,
    pub stages: Vec<StageReport>,
}

impl RunResult {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            status: RunStatus::Failed,
            final_stage: PipelineStage::Pending,
            spec: None,
            backend: None,
            ui: None,
            bundle: None,
            deployment: None,
            error: None,
            partial_urls: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Complete
    }

    fn finish(mut self, run: PipelineRun) -> Self {
        self.status = if run.is_success() {
            RunStatus::Complete
        } else {
            RunStatus::Failed
        };
        self.final_stage = run.final_stage();
        self.stages = run.into_reports();
        self
    }
}

/// The generation-and-deployment pipeline
pub struct Pipeline {
    config: Config,
    model: Arc<dyn ModelClient>,
    integrator: Integrator,
    deployer: Arc<Deployer>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        model: Arc<dyn ModelClient>,
        integrator: Integrator,
        deployer: Arc<Deployer>,
    ) -> Self {
        Self {
            config,
            model,
            integrator,
            deployer,
        }
    }

    /// Wire the production components from configuration
    ///
    /// Deployment records are persisted when a database is given.
    pub fn from_config(config: Config, database: Option<&Database>) -> Result<Self, PipelineError> {
        let model: Arc<dyn ModelClient> = Arc::new(LLMRouter::from_config(&config.llm));

        let mut integrator = Integrator::new(config.core.projects_dir.clone())
            .with_upload_timeout(config.store.timeout());
        if let Some(store) = integrator::store::from_config(&config.store)? {
            integrator = integrator.with_store(store);
        }

        let registry = Arc::new(DeploymentRegistry::new(&config.deploy));
        let mut deployer = Deployer::new(config.deploy.clone(), registry);
        if let Some(db) = database {
            deployer = deployer.with_repository(DeploymentRepository::new(db.pool().clone()));
        }

        Ok(Self::new(config, model, integrator, Arc::new(deployer)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn deployer(&self) -> &Arc<Deployer> {
        &self.deployer
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    fn context(&self) -> StageContext<'_> {
        StageContext::from_config(self.model.as_ref(), &self.config)
    }

    pub async fn analyze(&self, request: &Request) -> Result<RequirementsSpec, PipelineError> {
        let ctx = &self.context();
        self.retrying(move || agents::analyze(request, ctx)).await.0
    }

    pub async fn generate_backend(
        &self,
        spec: &RequirementsSpec,
    ) -> Result<CodeArtifact, PipelineError> {
        let ctx = &self.context();
        self.retrying(move || agents::generate_backend(spec, ctx))
            .await
            .0
    }

    pub async fn generate_ui(
        &self,
        spec: &RequirementsSpec,
        backend: &CodeArtifact,
    ) -> Result<UiArtifact, PipelineError> {
        let ctx = &self.context();
        self.retrying(move || agents::generate_ui(spec, backend, ctx))
            .await
            .0
    }

    pub async fn integrate(
        &self,
        backend: &CodeArtifact,
        ui: &UiArtifact,
    ) -> Result<ProjectBundle, PipelineError> {
        self.integrator.integrate(backend, ui).await
    }

    pub async fn deploy(&self, bundle: &ProjectBundle) -> Result<DeploymentRecord, PipelineError> {
        self.deployer.deploy(bundle).await.map_err(|failure| failure.error)
    }

    pub async fn stop_deployment(&self, id: &str) -> Result<StopResult, PipelineError> {
        self.deployer.stop(id).await
    }

    /// Run every stage including deployment
    pub async fn run_full_pipeline(&self, request: &Request) -> RunResult {
        self.run(request, RunOptions::default()).await
    }

    /// `run` on its own task; the run finishes even if the caller goes away
    pub async fn run_in_task(self: &Arc<Self>, request: Request, options: RunOptions) -> RunResult {
        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move { pipeline.run(&request, options).await });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                let mut result = RunResult::new(uuid::Uuid::new_v4().to_string());
                result.error = Some(PipelineError::Io(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    format!("pipeline task cancelled: {}", e),
                )));
                result
            }
        }
    }

    /// Run the stages in order, stopping at the first failure
    pub async fn run(&self, request: &Request, options: RunOptions) -> RunResult {
        let run = PipelineRun::new();
        let span = tracing::info_span!("pipeline_run", run_id = %run.id);
        self.run_stages(run, request, options).instrument(span).await
    }

    async fn run_stages(
        &self,
        mut run: PipelineRun,
        request: &Request,
        options: RunOptions,
    ) -> RunResult {
        let mut result = RunResult::new(run.id.clone());
        let ctx = &self.context();
        tracing::info!(deploy = options.deploy, "Pipeline run started");

        run.advance();
        let spec = match self
            .stage(&mut run, move || agents::analyze(request, ctx))
            .await
        {
            Ok(spec) => result.spec.insert(spec).clone(),
            Err(e) => return Self::failed(result, run, e),
        };

        run.advance();
        let backend = match self
            .stage(&mut run, || agents::generate_backend(&spec, ctx))
            .await
        {
            Ok(backend) => result.backend.insert(backend).clone(),
            Err(e) => return Self::failed(result, run, e),
        };

        run.advance();
        let ui = match self
            .stage(&mut run, || agents::generate_ui(&spec, &backend, ctx))
            .await
        {
            Ok(ui) => result.ui.insert(ui).clone(),
            Err(e) => return Self::failed(result, run, e),
        };

        run.advance();
        let integrator = &self.integrator;
        let bundle = match self
            .stage(&mut run, || integrator.integrate(&backend, &ui))
            .await
        {
            Ok(bundle) => result.bundle.insert(bundle).clone(),
            Err(e) => return Self::failed(result, run, e),
        };

        if !options.deploy {
            run.complete();
            tracing::info!(bundle_id = %bundle.id, "Pipeline run complete without deployment");
            return result.finish(run);
        }

        run.advance();
        match self.deployer.deploy(&bundle).await {
            Ok(record) => {
                run.succeed(1);
                run.complete();
                tracing::info!(
                    deployment_id = %record.id,
                    backend_url = %record.backend_url,
                    frontend_url = %record.frontend_url,
                    "Pipeline run complete"
                );
                result.deployment = Some(record);
                result.finish(run)
            }
            Err(DeployFailure {
                error,
                backend_url,
                frontend_url,
            }) => {
                result.partial_urls = backend_url.into_iter().chain(frontend_url).collect();
                run.fail(1, &error);
                Self::failed(result, run, error)
            }
        }
    }

    /// Run the current stage with retry and record its outcome
    async fn stage<T, F, Fut>(&self, run: &mut PipelineRun, op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let (result, attempts) = self.retrying(op).await;
        match &result {
            Ok(_) => run.succeed(attempts),
            Err(e) => run.fail(attempts, e),
        }
        result
    }

    async fn retrying<T, F, Fut>(&self, op: F) -> (Result<T, PipelineError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        with_single_retry(self.config.pipeline.retry_backoff(), op).await
    }

    fn failed(mut result: RunResult, run: PipelineRun, error: PipelineError) -> RunResult {
        tracing::error!(
            stage = %run.final_stage(),
            kind = error.kind(),
            error = %error,
            "Pipeline run failed"
        );
        result.error = Some(error);
        result.finish(run)
    }
}
