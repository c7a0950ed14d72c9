//! Daemon lifecycle management
//!
//! The daemon is the long-lived `launchpad serve` process. It:
//! - holds the PID file (`{data_dir}/launchpad.pid`) so only one daemon runs
//! - reconciles deployments left behind by processes that are gone
//! - serves the HTTP API until SIGTERM or Ctrl+C
//! - stops every deployment it owns on the way out
//!
//! # Graceful Shutdown
//!
//! 1. The listener stops accepting connections
//! 2. Every deployment owned by this process is stopped
//! 3. The SQLite WAL is flushed
//! 4. The PID file is removed

use anyhow::{bail, Context, Result};
use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::db::Database;
use crate::deployer::process::is_process_running;
use crate::pipeline::Pipeline;

/// Daemon status information
#[derive(Debug, Clone, serde::Serialize)]
pub struct DaemonStatus {
    /// Whether the daemon is currently running
    pub is_running: bool,

    /// Process ID if running
    pub pid: Option<u32>,

    /// Path to the PID file
    pub pid_file: PathBuf,
}

/// A started daemon: PID file held, database open, pipeline wired
pub struct Daemon {
    pid_file: PathBuf,
    database: Arc<Database>,
    pipeline: Arc<Pipeline>,
}

impl Daemon {
    /// Starts the daemon
    ///
    /// Fails if another daemon holds the PID file. Stale PID files are
    /// replaced. Orphaned deployments are reconciled before this returns.
    pub async fn start(config: Config) -> Result<Self> {
        let pid_file = Self::pid_file_path(&config);
        if Self::is_daemon_running(&pid_file)? {
            bail!(
                "launchpad daemon already running (PID file {})",
                pid_file.display()
            );
        }
        Self::write_pid_file(&pid_file)?;

        let database = Arc::new(
            Database::new(&config.database_path())
                .await
                .context("Failed to open database")?,
        );
        let pipeline = Arc::new(Pipeline::from_config(config, Some(database.as_ref()))?);

        match pipeline.deployer().reconcile_orphans().await {
            Ok(0) => tracing::debug!("No orphaned deployments"),
            Ok(count) => tracing::info!(count, "Orphaned deployments stopped"),
            Err(e) => tracing::warn!(error = %e, "Deployment reconciliation failed"),
        }

        Ok(Self {
            pid_file,
            database,
            pipeline,
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Serve the HTTP API on `bind` until a shutdown signal arrives
    pub async fn serve(self, bind: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to bind {}", bind))?;
        self.serve_until(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_until(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        let app = api::router(ApiState::new(Arc::clone(&self.pipeline)));

        tracing::info!("API server listening on http://{}", addr);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        self.graceful_shutdown().await;
        served.context("API server error")
    }

    /// Stop owned deployments, flush the WAL and drop the PID file
    pub async fn graceful_shutdown(&self) {
        tracing::info!("Starting graceful shutdown");

        self.pipeline.deployer().stop_all().await;

        match self.database.flush_wal().await {
            Ok(()) => tracing::info!("SQLite WAL flushed successfully"),
            Err(e) => tracing::error!("Failed to flush SQLite WAL: {}", e),
        }

        self.remove_pid_file();
        tracing::info!("Graceful shutdown completed");
    }

    /// Gets the daemon status from the PID file
    pub fn status(config: &Config) -> DaemonStatus {
        let pid_file = Self::pid_file_path(config);
        let pid = Self::read_pid_file(&pid_file)
            .ok()
            .filter(|pid| is_process_running(*pid));

        DaemonStatus {
            is_running: pid.is_some(),
            pid,
            pid_file,
        }
    }

    fn pid_file_path(config: &Config) -> PathBuf {
        config.core.data_dir.join("launchpad.pid")
    }

    fn is_daemon_running(pid_file: &Path) -> Result<bool> {
        if !pid_file.exists() {
            return Ok(false);
        }

        match Self::read_pid_file(pid_file) {
            Ok(pid) if pid != std::process::id() && is_process_running(pid) => Ok(true),
            _ => {
                tracing::info!("Removing stale PID file {}", pid_file.display());
                fs::remove_file(pid_file).context("Failed to remove stale PID file")?;
                Ok(false)
            }
        }
    }

    fn write_pid_file(pid_file: &Path) -> Result<()> {
        let pid = std::process::id();
        if let Some(parent) = pid_file.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;
        tracing::info!("Wrote PID {} to {:?}", pid, pid_file);
        Ok(())
    }

    fn read_pid_file(pid_file: &Path) -> Result<u32> {
        let content = fs::read_to_string(pid_file).context("Failed to read PID file")?;
        content
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Invalid PID in {}", pid_file.display()))
    }

    fn remove_pid_file(&self) {
        if self.pid_file.exists() {
            if let Err(e) = fs::remove_file(&self.pid_file) {
                tracing::warn!("Failed to remove PID file: {}", e);
            }
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.remove_pid_file();
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
