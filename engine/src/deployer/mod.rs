//! Deployer
//!
//! Launches a `ProjectBundle` as two local services:
//!
//! 1. allocate a backend and a frontend port from the registry
//! 2. optionally install backend dependencies
//! 3. spawn both processes with logs under `{bundle_root}/.logs/`
//! 4. fail fast if either exits inside the startup grace window
//! 5. poll `GET {backend_url}/health` until it answers 200
//!
//! Every failure after spawning goes through `abort_launch`, which
//! terminates whatever was spawned and marks the persisted row failed. The
//! port reservation and the process handles are guards: a launch dropped
//! midway still hands its ports back and kills its children. Stop goes
//! through the registry claim so each process is signalled exactly once.

use crate::config::DeployConfig;
use crate::db::DeploymentRepository;
use crate::integrator::templates;
use chrono::Utc;
use sdk::errors::PipelineError;
use sdk::{DeploymentRecord, DeploymentStatus, ProjectBundle, StopResult, StopStatus};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tracing::Instrument;

pub mod health;
pub mod process;
pub mod registry;

pub use health::HealthProbe;
pub use process::{ServicePair, ServiceProcess, ServiceRole};
pub use registry::{DeploymentRegistry, PortPair, Reservation, StopClaim};

const LOG_TAIL_LINES: usize = 20;

/// A failed deployment and whatever URLs were up when it failed
#[derive(Debug)]
pub struct DeployFailure {
    pub error: PipelineError,
    pub backend_url: Option<String>,
    pub frontend_url: Option<String>,
}

impl DeployFailure {
    fn bare(error: PipelineError) -> Self {
        Self {
            error,
            backend_url: None,
            frontend_url: None,
        }
    }

    pub fn partial_urls(&self) -> Vec<String> {
        self.backend_url
            .iter()
            .chain(self.frontend_url.iter())
            .cloned()
            .collect()
    }
}

impl From<PipelineError> for DeployFailure {
    fn from(error: PipelineError) -> Self {
        Self::bare(error)
    }
}

/// Services mid-launch, before they are handed to the registry
struct Launch {
    record: DeploymentRecord,
    services: Option<ServicePair>,
    backend_healthy: bool,
}

pub struct Deployer {
    config: DeployConfig,
    registry: Arc<DeploymentRegistry>,
    repository: Option<DeploymentRepository>,
    probe: HealthProbe,
    self_exe: PathBuf,
}

impl Deployer {
    pub fn new(config: DeployConfig, registry: Arc<DeploymentRegistry>) -> Self {
        let probe = HealthProbe::from_config(&config);
        let self_exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("launchpad"));
        Self {
            config,
            registry,
            repository: None,
            probe,
            self_exe,
        }
    }

    pub fn with_repository(mut self, repository: DeploymentRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Executable substituted for `{self}` in command templates
    pub fn with_self_exe(mut self, path: PathBuf) -> Self {
        self.self_exe = path;
        self
    }

    pub fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    fn url(&self, port: u16) -> String {
        format!("http://{}:{}", self.config.host, port)
    }

    /// Launch a bundle; on failure nothing is left running or reserved
    pub async fn deploy(&self, bundle: &ProjectBundle) -> Result<DeploymentRecord, DeployFailure> {
        let span = tracing::info_span!("deploy", bundle_id = %bundle.id);
        async {
            for dir in [bundle.backend_dir(), bundle.frontend_dir()] {
                if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                    return Err(DeployFailure::bare(PipelineError::Integration(format!(
                        "bundle directory missing: {}",
                        dir.display()
                    ))));
                }
            }

            let reservation = self.registry.reserve()?;
            self.launch(bundle, reservation).await
        }
        .instrument(span)
        .await
    }

    /// `deploy` on its own task, so a dropped caller cannot cut a launch short
    pub async fn deploy_in_task(
        self: &Arc<Self>,
        bundle: ProjectBundle,
    ) -> Result<DeploymentRecord, DeployFailure> {
        let deployer = Arc::clone(self);
        let task = tokio::spawn(async move { deployer.deploy(&bundle).await });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(DeployFailure::bare(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                format!("deploy task cancelled: {}", e),
            )))),
        }
    }

    async fn launch(
        &self,
        bundle: &ProjectBundle,
        reservation: Reservation<'_>,
    ) -> Result<DeploymentRecord, DeployFailure> {
        let ports = reservation.ports();
        let backend_dir = bundle.backend_dir();
        let frontend_dir = bundle.frontend_dir();
        let log_dir = bundle.root.join(".logs");
        let backend_url = self.url(ports.backend);
        let frontend_url = self.url(ports.frontend);

        self.install_dependencies(&backend_dir).await;

        let runtime_config = frontend_dir.join("runtime-config.js");
        if let Err(e) =
            tokio::fs::write(&runtime_config, templates::runtime_config_js(&backend_url)).await
        {
            tracing::warn!(path = %runtime_config.display(), error = %e, "Failed to write runtime config");
        }

        let backend = ServiceProcess::spawn(
            ServiceRole::Backend,
            &self.command(&self.config.backend_command, ports.backend, &backend_dir),
            &backend_dir,
            &log_dir,
        )?;
        let frontend = match ServiceProcess::spawn(
            ServiceRole::Frontend,
            &self.command(&self.config.frontend_command, ports.frontend, &frontend_dir),
            &frontend_dir,
            &log_dir,
        ) {
            Ok(frontend) => frontend,
            Err(e) => {
                backend.terminate(self.config.stop_timeout()).await;
                return Err(DeployFailure::bare(e));
            }
        };

        let record = DeploymentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            bundle_id: bundle.id.clone(),
            bundle_root: bundle.root.clone(),
            backend_port: ports.backend,
            frontend_port: ports.frontend,
            backend_pid: Some(backend.pid()),
            frontend_pid: Some(frontend.pid()),
            status: DeploymentStatus::Starting,
            backend_url,
            frontend_url,
            created_at: Utc::now(),
            stopped_at: None,
        };
        tracing::info!(
            deployment_id = %record.id,
            backend_port = ports.backend,
            frontend_port = ports.frontend,
            "Deployment starting"
        );
        self.persist(&record, Some(std::process::id())).await;

        let mut launch = Launch {
            record,
            services: Some(ServicePair { backend, frontend }),
            backend_healthy: false,
        };

        tokio::time::sleep(self.config.startup_grace()).await;
        if let Some(error) = self.early_exit(&mut launch).await {
            return Err(self.abort_launch(launch, error).await);
        }

        if let Err(error) = self.wait_healthy(&mut launch).await {
            return Err(self.abort_launch(launch, error).await);
        }

        launch.record.status = DeploymentStatus::Running;
        self.persist(&launch.record, Some(std::process::id())).await;
        if let Some(services) = launch.services.as_mut() {
            services.keep_alive();
        }
        reservation.commit(launch.record.clone(), launch.services.take());

        tracing::info!(
            deployment_id = %launch.record.id,
            backend_url = %launch.record.backend_url,
            frontend_url = %launch.record.frontend_url,
            "Deployment running"
        );
        Ok(launch.record)
    }

    fn command(&self, template: &[String], port: u16, dir: &Path) -> Vec<String> {
        process::render_command(
            template,
            &process::TemplateVars {
                port,
                dir,
                host: &self.config.host,
                self_exe: &self.self_exe,
            },
        )
    }

    /// Run the install command in `backend/`; failures are logged only
    async fn install_dependencies(&self, backend_dir: &Path) {
        let Some((program, args)) = self.config.install_command.split_first() else {
            return;
        };
        if !backend_dir.join("requirements.txt").exists() {
            return;
        }

        tracing::info!(command = %self.config.install_command.join(" "), "Installing backend dependencies");
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(backend_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.config.install_timeout(), output).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::info!("Backend dependencies installed");
            }
            Ok(Ok(output)) => {
                tracing::warn!(
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Dependency install failed, starting anyway"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Dependency install could not run, starting anyway");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.install_timeout_secs,
                    "Dependency install timed out, starting anyway"
                );
            }
        }
    }

    /// Spawn error for the first process found dead, with its log tail
    async fn early_exit(&self, launch: &mut Launch) -> Option<PipelineError> {
        let services = launch.services.as_mut()?;
        for service in [&mut services.backend, &mut services.frontend] {
            if let Some(status) = service.exit_status() {
                let tail = process::log_tail(service.log_path(), LOG_TAIL_LINES).await;
                tracing::error!(role = %service.role(), %status, "Service exited during startup");
                return Some(PipelineError::spawn(
                    service.role().as_str(),
                    format!("exited with {} during startup\n{}", status, tail),
                ));
            }
        }
        None
    }

    async fn wait_healthy(&self, launch: &mut Launch) -> Result<(), PipelineError> {
        let url = launch.record.backend_url.clone();
        for attempt in 1..=self.probe.attempts {
            if self.probe.probe_once(&url).await {
                tracing::info!(attempt, "Backend healthy");
                launch.backend_healthy = true;
                return Ok(());
            }
            if let Some(error) = self.early_exit(launch).await {
                return Err(error);
            }
            tracing::debug!(attempt, max = self.probe.attempts, "Backend not ready yet");
            if attempt < self.probe.attempts {
                tokio::time::sleep(self.probe.delay).await;
            }
        }

        Err(PipelineError::HealthCheckTimeout {
            url: format!("{}/health", url),
            attempts: self.probe.attempts,
        })
    }

    /// Release path for a launch that will not become a record
    ///
    /// The backend counts as up only once it answered a health probe, or
    /// when the frontend is what failed.
    async fn abort_launch(&self, mut launch: Launch, error: PipelineError) -> DeployFailure {
        let frontend_failed = matches!(
            &error,
            PipelineError::ProcessSpawn { role, .. } if role == ServiceRole::Frontend.as_str()
        );
        let (mut backend_url, mut frontend_url) = (None, None);
        if let Some(mut services) = launch.services.take() {
            if services.backend.is_running() && (launch.backend_healthy || frontend_failed) {
                backend_url = Some(launch.record.backend_url.clone());
            }
            if services.frontend.is_running() {
                frontend_url = Some(launch.record.frontend_url.clone());
            }
            services.terminate(self.config.stop_timeout()).await;
        }

        launch.record.status = DeploymentStatus::Failed;
        if let Some(repo) = &self.repository {
            if let Err(e) = repo.mark_failed(&launch.record.id).await {
                tracing::warn!(deployment_id = %launch.record.id, error = %e, "Failed to persist deployment failure");
            }
        }
        tracing::error!(deployment_id = %launch.record.id, error = %error, "Deployment failed");

        DeployFailure {
            error,
            backend_url,
            frontend_url,
        }
    }

    async fn persist(&self, record: &DeploymentRecord, owner_pid: Option<u32>) {
        if let Some(repo) = &self.repository {
            if let Err(e) = repo.upsert(record, owner_pid).await {
                tracing::warn!(deployment_id = %record.id, error = %e, "Failed to persist deployment");
            }
        }
    }

    /// Stop a deployment; stopping twice reports `already_stopped`
    pub async fn stop(&self, id: &str) -> Result<StopResult, PipelineError> {
        let status = match self.registry.claim_for_stop(id) {
            StopClaim::Claimed(services) => {
                if let Some(services) = services {
                    services.terminate(self.config.stop_timeout()).await;
                }
                self.registry.complete_stop(id);
                if let Some(repo) = &self.repository {
                    if let Err(e) = repo.mark_stopped(id).await {
                        tracing::warn!(deployment_id = id, error = %e, "Failed to persist stop");
                    }
                }
                StopStatus::Stopped
            }
            StopClaim::AlreadyStopped => StopStatus::AlreadyStopped,
            StopClaim::NotFound => self.stop_persisted(id).await?,
        };

        tracing::info!(deployment_id = id, ?status, "Stop handled");
        Ok(StopResult {
            deployment_id: id.to_string(),
            status,
        })
    }

    /// Stop a deployment known only from the database, by PID
    async fn stop_persisted(&self, id: &str) -> Result<StopStatus, PipelineError> {
        let Some(repo) = &self.repository else {
            return Ok(StopStatus::AlreadyStopped);
        };

        let stored = repo
            .get(id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        let Some(stored) = stored else {
            return Ok(StopStatus::AlreadyStopped);
        };
        if !stored.record.status.holds_ports() {
            return Ok(StopStatus::AlreadyStopped);
        }

        // The row transition decides which caller signals
        let claimed = repo
            .mark_stopped(id)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        if !claimed {
            return Ok(StopStatus::AlreadyStopped);
        }

        self.terminate_pids(&stored.record).await;
        Ok(StopStatus::Stopped)
    }

    async fn terminate_pids(&self, record: &DeploymentRecord) {
        let grace = self.config.stop_timeout();
        for pid in [record.backend_pid, record.frontend_pid].into_iter().flatten() {
            if process::terminate_pid(pid, grace).await {
                tracing::info!(deployment_id = %record.id, pid, "Process terminated");
            }
        }
    }

    /// Stop every deployment this process owns
    pub async fn stop_all(&self) {
        let ids = self.registry.active_ids();
        if ids.is_empty() {
            return;
        }
        tracing::info!(count = ids.len(), "Stopping all deployments");
        let stops = ids.iter().map(|id| self.stop(id));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to stop deployment");
            }
        }
    }

    /// Leave a deployment running after this process exits
    pub async fn detach(&self, id: &str) -> Option<DeploymentRecord> {
        let record = self.registry.detach(id)?;
        if let Some(repo) = &self.repository {
            if let Err(e) = repo.clear_owner(id).await {
                tracing::warn!(deployment_id = id, error = %e, "Failed to persist detach");
            }
        }
        tracing::info!(deployment_id = id, "Deployment detached");
        Some(record)
    }

    /// Stop persisted deployments whose owning process is gone
    ///
    /// Orphans are never adopted: their PIDs are terminated and the rows are
    /// marked stopped. Returns the number of rows reconciled.
    pub async fn reconcile_orphans(&self) -> Result<usize, PipelineError> {
        let Some(repo) = &self.repository else {
            return Ok(0);
        };

        let active = repo
            .list_active()
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

        let me = std::process::id();
        let mut reconciled = 0;
        for stored in active {
            let owner_alive = stored
                .owner_pid
                .is_some_and(|pid| pid == me || process::is_process_running(pid));
            if owner_alive || self.registry.lookup(&stored.record.id).is_some() {
                continue;
            }

            let claimed = repo
                .mark_stopped(&stored.record.id)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            if claimed {
                tracing::warn!(
                    deployment_id = %stored.record.id,
                    owner_pid = ?stored.owner_pid,
                    "Reconciling orphaned deployment"
                );
                self.terminate_pids(&stored.record).await;
                reconciled += 1;
            }
        }

        Ok(reconciled)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>, PipelineError> {
        if let Some(record) = self.registry.lookup(id) {
            return Ok(Some(record));
        }
        match &self.repository {
            Some(repo) => Ok(repo
                .get(id)
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?
                .map(|stored| stored.record)),
            None => Ok(None),
        }
    }

    /// Records owned here plus any persisted by other processes, newest first
    pub async fn list(&self) -> Result<Vec<DeploymentRecord>, PipelineError> {
        let mut records = self.registry.list();
        if let Some(repo) = &self.repository {
            let stored = repo
                .list()
                .await
                .map_err(|e| PipelineError::Database(e.to_string()))?;
            for stored in stored {
                if !records.iter().any(|r| r.id == stored.record.id) {
                    records.push(stored.record);
                }
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
