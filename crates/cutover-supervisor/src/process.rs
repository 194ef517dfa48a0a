//! ProcessSupervisor — spawns and terminates managed artifacts.
//!
//! `start` launches the artifact on a port with its combined output
//! redirected to the version's sink, then hands the child to a reaper
//! task. The returned `Instance` owns the only `ProcessHandle` for that
//! child; `stop` is the only way to signal it.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use cutover_core::{InstanceStatus, InstanceSummary, StateResult, VersionId, VersionIdGenerator};

use crate::error::{StartError, StopError};
use crate::launch::LaunchSpec;
use crate::sink::LogSinks;

/// Reply channel for a kill request sent to the reaper.
type KillRequest = oneshot::Sender<io::Result<()>>;

/// How a managed process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitOutcome {
    /// Exited with status 0.
    pub success: bool,
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    /// Human-readable form, e.g. `signal: 9 (SIGKILL)`.
    pub description: String,
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
            description: status.to_string(),
        }
    }

    fn wait_failed(err: &io::Error) -> Self {
        Self {
            success: false,
            code: None,
            description: format!("wait failed: {err}"),
        }
    }
}

/// Exclusive handle to one running child process.
///
/// Not `Clone`: the handle travels with its `Instance` and nothing else
/// can reach the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    /// Kill requests to the reaper.
    control: mpsc::Sender<KillRequest>,
    /// Filled in by the reaper once the child has exited.
    exit: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit outcome, if the reaper has already observed the exit.
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait until the reaper observes the exit.
    ///
    /// Returns `None` only if the reaper went away without recording
    /// an outcome.
    pub async fn wait_exit(&self) -> Option<ExitOutcome> {
        let mut rx = self.exit.clone();
        let observed = rx.wait_for(Option::is_some).await.map(|outcome| (*outcome).clone());
        match observed {
            Ok(outcome) => outcome,
            Err(_) => rx.borrow().clone(),
        }
    }

    /// Wait for exit, giving up after `grace`.
    pub async fn wait_exit_timeout(&self, grace: Duration) -> Option<ExitOutcome> {
        tokio::time::timeout(grace, self.wait_exit())
            .await
            .ok()
            .flatten()
    }
}

/// One managed process binding.
#[derive(Debug)]
pub struct Instance {
    version_id: VersionId,
    port: u16,
    artifact_path: PathBuf,
    started_at: DateTime<Utc>,
    status: InstanceStatus,
    handle: ProcessHandle,
}

impl Instance {
    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Apply a lifecycle transition. Illegal edges leave the status untouched.
    pub fn transition(&mut self, next: InstanceStatus) -> StateResult<()> {
        self.status = self.status.transition(next)?;
        debug!(version_id = %self.version_id, status = %self.status, "instance status changed");
        Ok(())
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            version_id: self.version_id.clone(),
            status: self.status,
            port: self.port,
            pid: self.handle.pid,
            artifact_path: self.artifact_path.clone(),
            started_at: self.started_at,
        }
    }
}

/// Spawns artifacts and owns their lifecycles.
#[derive(Debug)]
pub struct ProcessSupervisor {
    launch: LaunchSpec,
    sinks: LogSinks,
    ids: VersionIdGenerator,
}

impl ProcessSupervisor {
    pub fn new(launch: LaunchSpec, sinks: LogSinks) -> Self {
        Self {
            launch,
            sinks,
            ids: VersionIdGenerator::new(),
        }
    }

    pub fn sinks(&self) -> &LogSinks {
        &self.sinks
    }

    /// Launch `artifact` bound to `port`.
    ///
    /// On error nothing is left behind: no instance, no process, and the
    /// freshly created sink is removed.
    pub async fn start(&self, artifact: &Path, port: u16) -> Result<Instance, StartError> {
        let meta = tokio::fs::metadata(artifact)
            .await
            .map_err(|source| StartError::ArtifactMissing {
                path: artifact.to_path_buf(),
                source,
            })?;
        if !meta.is_file() {
            return Err(StartError::NotAFile(artifact.to_path_buf()));
        }

        let version_id = self.ids.next_id();
        let sink_path = self.sinks.path_for(&version_id);
        let sink_err = |source| StartError::Sink {
            path: sink_path.clone(),
            source,
        };
        let stdout = self.sinks.create(&version_id).map_err(sink_err)?;
        let stderr = stdout.try_clone().map_err(sink_err)?;

        let mut cmd = self.launch.command(artifact, port);
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                if let Err(e) = std::fs::remove_file(&sink_path) {
                    warn!(path = %sink_path.display(), error = %e, "failed to remove unused sink");
                }
                return Err(StartError::Spawn {
                    program: self.launch.program_for(artifact, port),
                    source,
                });
            }
        };
        // The parent's copies of the sink descriptors went into `cmd`;
        // dropping it leaves the child as the only writer.
        drop(cmd);

        let pid = child.id();
        let (control_tx, control_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(reap(child, control_rx, exit_tx, version_id.clone()));

        info!(
            %version_id,
            port,
            pid = ?pid,
            artifact = %artifact.display(),
            "instance started"
        );

        Ok(Instance {
            version_id,
            port,
            artifact_path: artifact.to_path_buf(),
            started_at: Utc::now(),
            status: InstanceStatus::Starting,
            handle: ProcessHandle {
                pid,
                control: control_tx,
                exit: exit_rx,
            },
        })
    }

    /// Send a forceful termination signal to the instance's process.
    ///
    /// Returns once the signal is delivered; the exit itself is observed
    /// asynchronously by the reaper. Failures are reported, not retried.
    pub async fn stop(&self, instance: &Instance) -> Result<(), StopError> {
        let handle = &instance.handle;
        let version_id = instance.version_id.clone();

        if let Some(outcome) = handle.exit_outcome() {
            return Err(StopError::AlreadyExited {
                version_id,
                outcome: Some(outcome),
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.control.send(reply_tx).await.is_err() {
            return Err(StopError::AlreadyExited {
                outcome: handle.exit_outcome(),
                version_id,
            });
        }

        match reply_rx.await {
            Ok(Ok(())) => {
                info!(%version_id, pid = ?handle.pid, "kill signal delivered");
                Ok(())
            }
            Ok(Err(source)) => Err(StopError::Signal { version_id, source }),
            // The reaper saw the exit before it got to our request.
            Err(_) => Err(StopError::AlreadyExited {
                outcome: handle.exit_outcome(),
                version_id,
            }),
        }
    }
}

/// Single exit-observation task per child.
async fn reap(
    mut child: Child,
    mut control: mpsc::Receiver<KillRequest>,
    exit: watch::Sender<Option<ExitOutcome>>,
    version_id: VersionId,
) {
    let pid = child.id();
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(reply) = control.recv() => {
                if reply.send(child.start_kill()).is_err() {
                    debug!(%version_id, "stop caller went away before the kill was confirmed");
                }
            }
        }
    };

    let outcome = match status {
        Ok(status) => ExitOutcome::from_status(status),
        Err(e) => {
            error!(%version_id, pid = ?pid, error = %e, "failed to reap process");
            ExitOutcome::wait_failed(&e)
        }
    };

    if outcome.success {
        info!(%version_id, pid = ?pid, "process exited");
    } else {
        warn!(%version_id, pid = ?pid, outcome = %outcome.description, "process exited abnormally");
    }
    exit.send_replace(Some(outcome));
}
