//! Spawned service processes
//!
//! A `ServiceProcess` owns its child handle. `terminate` consumes it, so a
//! process can be signalled at most once through the handle.
//!
//! A freshly spawned process is killed when its handle is dropped. The
//! deployer calls `keep_alive` once the process belongs to a live deployment,
//! which must outlive the handle when it is detached.

use sdk::errors::PipelineError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Which half of a deployment a process serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Backend,
    Frontend,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values substituted into a command template
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub port: u16,
    pub dir: &'a Path,
    pub host: &'a str,
    /// Path of the running launchpad executable
    pub self_exe: &'a Path,
}

/// Expand `{port}`, `{dir}`, `{host}` and `{self}` in every argument
pub fn render_command(template: &[String], vars: &TemplateVars<'_>) -> Vec<String> {
    let port = vars.port.to_string();
    let dir = vars.dir.to_string_lossy();
    let self_exe = vars.self_exe.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace("{port}", &port)
                .replace("{dir}", &dir)
                .replace("{host}", vars.host)
                .replace("{self}", &self_exe)
        })
        .collect()
}

pub struct ServiceProcess {
    role: ServiceRole,
    pid: u32,
    child: Child,
    log_path: PathBuf,
    kill_on_drop: bool,
}

impl fmt::Debug for ServiceProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProcess")
            .field("role", &self.role)
            .field("pid", &self.pid)
            .field("log_path", &self.log_path)
            .field("kill_on_drop", &self.kill_on_drop)
            .finish()
    }
}

impl ServiceProcess {
    /// Spawn `argv` in `cwd` with stdout and stderr appended to `{log_dir}/{role}.log`
    pub fn spawn(
        role: ServiceRole,
        argv: &[String],
        cwd: &Path,
        log_dir: &Path,
    ) -> Result<Self, PipelineError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PipelineError::spawn(role.as_str(), "empty command"))?;

        std::fs::create_dir_all(log_dir)
            .map_err(|e| PipelineError::spawn(role.as_str(), format!("log directory: {}", e)))?;
        let log_path = log_dir.join(format!("{}.log", role));
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| PipelineError::spawn(role.as_str(), format!("log file: {}", e)))?;
        let log_err = log
            .try_clone()
            .map_err(|e| PipelineError::spawn(role.as_str(), format!("log file: {}", e)))?;

        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| PipelineError::spawn(role.as_str(), format!("{}: {}", program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| PipelineError::spawn(role.as_str(), "process exited before reporting a pid"))?;

        tracing::info!(role = %role, pid, command = %argv.join(" "), "Service spawned");

        Ok(Self {
            role,
            pid,
            child,
            log_path,
            kill_on_drop: true,
        })
    }

    pub fn role(&self) -> ServiceRole {
        self.role
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn kills_on_drop(&self) -> bool {
        self.kill_on_drop
    }

    /// Let the process outlive this handle
    pub fn keep_alive(&mut self) {
        self.kill_on_drop = false;
    }

    /// Exit status if the process has already exited
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    pub fn is_running(&mut self) -> bool {
        self.exit_status().is_none()
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL
    pub async fn terminate(mut self, grace: Duration) {
        if let Some(status) = self.exit_status() {
            tracing::debug!(role = %self.role, pid = self.pid, %status, "Service already exited");
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;
            signal_pid(self.pid, Signal::SIGTERM);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(role = %self.role, pid = self.pid, %status, "Service stopped");
            }
            Ok(Err(e)) => {
                tracing::warn!(role = %self.role, pid = self.pid, error = %e, "Failed to wait for service");
            }
            Err(_) => {
                tracing::warn!(
                    role = %self.role,
                    pid = self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Service ignored SIGTERM, killing"
                );
                if let Err(e) = self.child.kill().await {
                    tracing::error!(role = %self.role, pid = self.pid, error = %e, "Failed to kill service");
                }
            }
        }
    }
}

impl Drop for ServiceProcess {
    fn drop(&mut self) {
        if !self.kill_on_drop || self.exit_status().is_some() {
            return;
        }
        tracing::warn!(role = %self.role, pid = self.pid, "Killing abandoned service");
        if let Err(e) = self.child.start_kill() {
            tracing::error!(role = %self.role, pid = self.pid, error = %e, "Failed to kill service");
        }
    }
}

/// The two processes of one deployment
#[derive(Debug)]
pub struct ServicePair {
    pub backend: ServiceProcess,
    pub frontend: ServiceProcess,
}

impl ServicePair {
    pub fn keep_alive(&mut self) {
        self.backend.keep_alive();
        self.frontend.keep_alive();
    }

    pub async fn terminate(self, grace: Duration) {
        tokio::join!(
            self.backend.terminate(grace),
            self.frontend.terminate(grace)
        );
    }
}

/// Send `signal` to `pid`, returning whether delivery succeeded
#[cfg(unix)]
pub fn signal_pid(pid: u32, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid, %signal, error = %e, "Signal not delivered");
            false
        }
    }
}

/// Checks if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Signal 0 only checks that the process exists
        kill(Pid::from_raw(pid as i32), None).is_ok() && !is_zombie(pid)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// A killed child stays a zombie until it is reaped
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Stop a process we hold no handle for
///
/// Returns false if the process was not running.
pub async fn terminate_pid(pid: u32, grace: Duration) -> bool {
    if pid == 0 || !is_process_running(pid) {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;

        signal_pid(pid, Signal::SIGTERM);
        let exited = tokio::time::timeout(grace, async {
            while is_process_running(pid) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .is_ok();

        if !exited {
            tracing::warn!(pid, "Process ignored SIGTERM, killing");
            signal_pid(pid, Signal::SIGKILL);
        }
    }

    true
}

/// Last `max_lines` lines of a log file
pub async fn log_tail(path: &Path, max_lines: usize) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(max_lines);
            lines[start..].join("\n")
        }
        Err(e) => format!("<log unavailable: {}>", e),
    }
}
