//! Supervision of the managed backend process.
//!
//! # Responsibilities
//! - Spawn the backend with its port injected and output sent to a log file
//! - Track the lifecycle state and publish read-only snapshots
//! - Stop with SIGTERM, escalating to a kill after the grace period
//!
//! # State Machine
//! ```text
//! NotStarted → Starting → Ready | Degraded → Stopping → Stopped
//!                              Degraded → Ready (late readiness)
//! NotStarted → Failed                     (launch failed, terminal)
//! ```
//!
//! # Design Decisions
//! - One process per supervisor lifetime; a second `start` is rejected
//! - The child handle lives behind an async mutex, status behind a watch
//!   channel, so status reads never wait on start/stop
//! - `kill_on_drop` so an aborted edge never orphans the child

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::time;

use crate::config::BackendConfig;
use crate::error::EdgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Ready,
    Degraded,
    Stopping,
    Stopped,
    /// The process could not be launched; the edge serves without it.
    Failed,
}

/// Read-only view of the backend process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub state: LifecycleState,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
}

/// How a `stop` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running; no signal sent.
    NotRunning,
    /// The child had already exited on its own.
    AlreadyExited,
    /// The child exited after SIGTERM within the grace period.
    Terminated,
    /// The grace period elapsed and the child was killed.
    Killed,
}

/// Everything needed to launch the backend.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub port_env: String,
    pub port: u16,
    pub log_path: PathBuf,
}

impl LaunchSpec {
    pub fn from_config(config: &BackendConfig, port: u16) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: PathBuf::from(&config.working_dir),
            env: config.env.clone(),
            port_env: config.port_env.clone(),
            port,
            log_path: PathBuf::from(&config.log_path),
        }
    }

    fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// The spawned child. Owned by the supervisor only.
#[derive(Debug)]
struct BackendProcess {
    child: Child,
    pid: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    state: LifecycleState,
    pid: Option<u32>,
    started_at: Option<Instant>,
}

pub struct ProcessSupervisor {
    process: Mutex<Option<BackendProcess>>,
    status: watch::Sender<Snapshot>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (status, _) = watch::channel(Snapshot {
            state: LifecycleState::NotStarted,
            pid: None,
            started_at: None,
        });
        Self {
            process: Mutex::new(None),
            status,
        }
    }

    /// Spawn the backend. Returns as soon as the process exists.
    pub async fn start(&self, spec: &LaunchSpec) -> Result<ProcessStatus, EdgeError> {
        let mut slot = self.process.lock().await;
        if slot.is_some() || self.state() != LifecycleState::NotStarted {
            return Err(EdgeError::AlreadyStarted);
        }

        let launch_failure = |source: std::io::Error| EdgeError::LaunchFailure {
            command: spec.display(),
            source,
        };

        let (program, args) = spec.command.split_first().ok_or_else(|| {
            launch_failure(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
        })?;

        let stdout = open_log_sink(&spec.log_path).map_err(launch_failure)?;
        let stderr = stdout.try_clone().map_err(launch_failure)?;

        let child = Command::new(program)
            .args(args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .env(&spec.port_env, spec.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_failure)?;

        let pid = child.id();
        tracing::info!(
            command = %spec.display(),
            pid = ?pid,
            port = spec.port,
            log = %spec.log_path.display(),
            "Backend process started"
        );

        *slot = Some(BackendProcess { child, pid });
        self.status.send_modify(|s| {
            s.state = LifecycleState::Starting;
            s.pid = pid;
            s.started_at = Some(Instant::now());
        });
        Ok(self.status())
    }

    /// Readiness handoff: the probe saw the backend answer.
    pub fn mark_ready(&self) -> bool {
        self.transition(&[LifecycleState::Starting, LifecycleState::Degraded], LifecycleState::Ready)
    }

    /// Launch handoff: `start` failed and the edge carries on without a child.
    pub fn mark_failed(&self) -> bool {
        self.transition(&[LifecycleState::NotStarted], LifecycleState::Failed)
    }

    /// Readiness handoff: the probe gave up, keep serving degraded.
    pub fn mark_degraded(&self) -> bool {
        self.transition(&[LifecycleState::Starting], LifecycleState::Degraded)
    }

    /// Stop the backend: SIGTERM, wait up to `grace`, then kill.
    /// Calling it again after the process is gone is a no-op.
    pub async fn stop(&self, grace: Duration) -> StopOutcome {
        let mut slot = self.process.lock().await;
        let Some(mut process) = slot.take() else {
            tracing::debug!("Stop requested but no backend process is running");
            return StopOutcome::NotRunning;
        };

        if let Ok(Some(status)) = process.child.try_wait() {
            tracing::info!(pid = ?process.pid, status = %status, "Backend process had already exited");
            self.set_stopped();
            return StopOutcome::AlreadyExited;
        }

        self.status.send_modify(|s| s.state = LifecycleState::Stopping);
        tracing::info!(pid = ?process.pid, grace = ?grace, "Stopping backend process");
        terminate(&mut process).await;

        let outcome = match time::timeout(grace, process.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(pid = ?process.pid, status = %status, "Backend process exited");
                StopOutcome::Terminated
            }
            Ok(Err(e)) => {
                tracing::warn!(pid = ?process.pid, error = %e, "Failed to wait for backend process");
                force_kill(&mut process).await;
                StopOutcome::Killed
            }
            Err(_) => {
                tracing::warn!(pid = ?process.pid, grace = ?grace, "Backend ignored SIGTERM, killing");
                force_kill(&mut process).await;
                StopOutcome::Killed
            }
        };

        self.set_stopped();
        outcome
    }

    pub fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ProcessStatus {
        let snapshot = *self.status.borrow();
        ProcessStatus {
            state: snapshot.state,
            pid: snapshot.pid,
            uptime_secs: snapshot.started_at.map(|t| t.elapsed().as_secs()),
        }
    }

    fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> bool {
        let changed = self.status.send_if_modified(|s| {
            if from.contains(&s.state) {
                s.state = to;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(state = ?to, "Backend lifecycle state changed");
        }
        changed
    }

    fn set_stopped(&self) {
        self.status.send_modify(|s| {
            s.state = LifecycleState::Stopped;
            s.started_at = None;
        });
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn open_log_sink(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

/// Graceful termination request.
#[cfg(unix)]
async fn terminate(process: &mut BackendProcess) {
    let Some(pid) = process.pid else {
        return;
    };
    let sent = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match sent {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!(pid, status = %status, "kill -TERM failed"),
        Err(e) => tracing::warn!(pid, error = %e, "Could not run kill"),
    }
}

/// No graceful signal outside unix; the grace period is skipped.
#[cfg(not(unix))]
async fn terminate(process: &mut BackendProcess) {
    if let Err(e) = process.child.start_kill() {
        tracing::warn!(pid = ?process.pid, error = %e, "Failed to kill backend process");
    }
}

async fn force_kill(process: &mut BackendProcess) {
    if let Err(e) = process.child.kill().await {
        tracing::error!(pid = ?process.pid, error = %e, "Failed to kill backend process");
    }
}
