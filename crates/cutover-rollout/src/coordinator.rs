//! Deployment coordinator — the blue-green state machine.
//!
//! A deployment moves through:
//!
//! 1. admission (one candidate at a time, otherwise `Conflict`)
//! 2. candidate start on a free port
//! 3. health gate
//! 4. swap: router target and active pointer change together
//! 5. retirement of the previous active instance and backup of its artifact
//!
//! Steps 1-2 run in `begin_deploy`. Steps 3-5 run in a driver task
//! spawned by `begin_deploy`, so retirement happens whether or not anyone
//! waits on the `PendingDeployment`. The terminal health transition and
//! the swap run inside the health task's `on_settled` hook while the
//! state lock is held, so status readers see either the whole swap or
//! none of it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cutover_core::config::{HealthConfig, PortRangeConfig};
use cutover_core::{
    CutoverConfig, InstanceStatus, InstanceSummary, StateError, StateResult, VersionHistory,
    VersionId, VersionRecord, VersionStore,
};
use cutover_health::{HealthMonitor, HealthOutcome, Probe, WatchHandle, WatchPolicy};
use cutover_proxy::{RouterTarget, TrafficRouter};
use cutover_supervisor::{Instance, PortAllocator, ProcessSupervisor, StopError};

use crate::backup;
use crate::error::DeployError;

/// Orchestrator state. Guarded by one mutex.
#[derive(Debug, Default)]
struct DeployState {
    /// Instance receiving traffic. Always `Running`.
    active: Option<Instance>,
    /// The newest candidate: `Starting` during its health gate, `Error`
    /// after failing it.
    standby: Option<Instance>,
    /// Instances nothing points at any more whose processes may still run.
    strays: Vec<Instance>,
    /// A candidate is being started and is not yet in `standby`.
    launching: bool,
    /// Backups of retired versions, oldest first.
    versions: VersionStore,
}

impl DeployState {
    fn deploying(&self) -> bool {
        self.launching
            || self
                .standby
                .as_ref()
                .is_some_and(|c| !c.status().is_settled())
    }

    /// Ports held by live instances.
    fn reserved_ports(&self) -> Vec<u16> {
        self.active
            .iter()
            .chain(self.standby.iter())
            .chain(self.strays.iter())
            .map(Instance::port)
            .collect()
    }

    /// Health gate passed: the four-step swap.
    ///
    /// Both transitions are validated before anything changes, so an
    /// error leaves router and pointers untouched.
    fn promote(
        &mut self,
        version_id: &VersionId,
        router: &TrafficRouter,
    ) -> StateResult<Option<Instance>> {
        let Some(mut candidate) = self.standby.take_if(|c| c.version_id() == version_id) else {
            return Err(StateError::NotFound(version_id.clone()));
        };
        let checked = candidate.status().transition(InstanceStatus::Running).and_then(|_| {
            match &self.active {
                Some(active) => active.status().transition(InstanceStatus::Retired).map(|_| ()),
                None => Ok(()),
            }
        });
        if let Err(e) = checked {
            self.standby = Some(candidate);
            return Err(e);
        }

        candidate.transition(InstanceStatus::Running)?;
        let mut retiring = self.active.take();
        router.set_target(candidate.port());
        if let Some(old) = retiring.as_mut() {
            old.transition(InstanceStatus::Retired)?;
        }
        info!(
            version_id = %candidate.version_id(),
            port = candidate.port(),
            retiring = ?retiring.as_ref().map(|r| r.version_id().to_string()),
            "traffic switched"
        );
        self.active = Some(candidate);
        Ok(retiring)
    }

    /// Health gate failed: the candidate stays as an `Error` standby.
    fn fail(&mut self, version_id: &VersionId) -> StateResult<()> {
        match self.standby.as_mut() {
            Some(c) if c.version_id() == version_id => c.transition(InstanceStatus::Error),
            _ => Err(StateError::NotFound(version_id.clone())),
        }
    }
}

struct Inner {
    state: Mutex<DeployState>,
    supervisor: ProcessSupervisor,
    monitor: HealthMonitor,
    router: TrafficRouter,
    ports: PortAllocator,
    probe: Probe,
    policy: WatchPolicy,
    backup_dir: PathBuf,
    retire_grace: Duration,
    /// Driver tasks of deployments that may still be retiring.
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, DeployState> {
        self.state.lock().expect("deploy state lock")
    }

    fn track(&self, driver: JoinHandle<()>) {
        let mut drivers = self.drivers.lock().expect("deploy driver lock");
        drivers.retain(|d| !d.is_finished());
        drivers.push(driver);
    }
}

/// Orchestrator context. Cheap to clone; every clone drives the same state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Instance receiving traffic.
    pub active: Option<InstanceSummary>,
    /// Latest candidate, starting or failed.
    pub standby: Option<InstanceSummary>,
    /// Displaced or unstoppable instances awaiting cleanup.
    pub strays: Vec<InstanceSummary>,
    /// Where the router currently forwards. Matches `active`.
    pub target: Option<RouterTarget>,
    /// A deployment would be rejected with `Conflict` right now.
    pub deploying: bool,
}

/// Outcome of a completed deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    /// The new active version.
    pub version_id: VersionId,
    pub port: u16,
    /// Previous active instance, if there was one.
    pub retired: Option<VersionId>,
    /// History entry for `retired`. `None` when the backup move failed.
    pub backup: Option<VersionRecord>,
}

type Settlement = Result<Option<Instance>, DeployError>;

type Report = Result<DeployReport, DeployError>;

/// A started candidate waiting on its health gate.
///
/// Only observes the deployment: dropping it discards the report, while
/// the swap and retirement still run to completion.
#[must_use = "the deployment continues in the background; `finish` returns its report"]
pub struct PendingDeployment {
    version_id: VersionId,
    port: u16,
    report: oneshot::Receiver<Report>,
}

impl PendingDeployment {
    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the health gate and the retirement of the previous
    /// active instance.
    pub async fn finish(self) -> Report {
        self.report
            .await
            .map_err(|_| DeployError::Interrupted(self.version_id))?
    }
}

/// Clears the launching flag unless the candidate was installed.
struct LaunchSlot<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for LaunchSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.inner.state.lock() {
                state.launching = false;
            }
        }
    }
}

impl Coordinator {
    pub fn builder(supervisor: ProcessSupervisor) -> CoordinatorBuilder {
        CoordinatorBuilder::new(supervisor)
    }

    /// Builder with every component configured from `config`.
    pub fn from_config(config: &CutoverConfig) -> CoordinatorBuilder {
        let supervisor = ProcessSupervisor::new(
            (&config.launch).into(),
            cutover_supervisor::LogSinks::new(&config.paths.log_dir),
        );
        CoordinatorBuilder::new(supervisor)
            .ports((&config.ports).into())
            .probe(cutover_health::from_config(&config.health))
            .policy((&config.health).into())
            .backup_dir(&config.paths.backup_dir)
            .retire_grace(config.lifecycle.retire_grace)
    }

    pub fn router(&self) -> &TrafficRouter {
        &self.inner.router
    }

    /// Admit and start a candidate. The health gate runs in the background.
    ///
    /// `Conflict`, `NoFreePort` and `StartError` leave no trace in the state.
    pub async fn begin_deploy(&self, artifact: &Path) -> Result<PendingDeployment, DeployError> {
        let inner = &*self.inner;
        let reserved = {
            let mut state = inner.lock();
            if state.deploying() {
                let candidate = state.standby.as_ref().map(|c| c.version_id().clone());
                debug!(artifact = %artifact.display(), ?candidate, "deploy rejected");
                return Err(DeployError::Conflict { candidate });
            }
            state.launching = true;
            state.reserved_ports()
        };
        let mut slot = LaunchSlot { inner, armed: true };

        let port = inner.ports.acquire(&reserved)?;
        let candidate = inner.supervisor.start(artifact, port).await?;
        let version_id = candidate.version_id().clone();

        let mut state = inner.lock();
        state.launching = false;
        slot.armed = false;

        if let Some(displaced) = state.standby.take() {
            warn!(
                version_id = %displaced.version_id(),
                port = displaced.port(),
                "failed candidate displaced; process left running until cleanup"
            );
            state.strays.push(displaced);
        }
        state.standby = Some(candidate);

        let settle_inner = self.inner.clone();
        let settle_id = version_id.clone();
        let deadline = inner.policy.deadline;
        let watch = inner.monitor.watch(
            version_id.clone(),
            port,
            inner.probe.clone(),
            inner.policy,
            move |outcome| -> Settlement {
                let mut state = settle_inner.lock();
                match outcome {
                    HealthOutcome::Ready => Ok(state.promote(&settle_id, &settle_inner.router)?),
                    HealthOutcome::TimedOut => {
                        state.fail(&settle_id)?;
                        Err(DeployError::HealthTimeout {
                            version_id: settle_id,
                            deadline,
                        })
                    }
                }
            },
        );
        let watch = match watch {
            Ok(watch) => watch,
            Err(e) => {
                if let Some(c) = state.standby.as_mut() {
                    if let Err(te) = c.transition(InstanceStatus::Error) {
                        warn!(%version_id, error = %te, "could not mark candidate as failed");
                    }
                }
                return Err(e.into());
            }
        };
        drop(state);

        let (report_tx, report_rx) = oneshot::channel();
        let driver = tokio::spawn(self.clone().drive(version_id.clone(), port, watch, report_tx));
        inner.track(driver);

        info!(%version_id, port, artifact = %artifact.display(), "candidate admitted");
        Ok(PendingDeployment {
            version_id,
            port,
            report: report_rx,
        })
    }

    /// Settle a deployment: wait for the health gate, then retire the
    /// swapped-out instance. The report goes to whoever still listens.
    async fn drive(
        self,
        version_id: VersionId,
        port: u16,
        watch: WatchHandle<Settlement>,
        report: oneshot::Sender<Report>,
    ) {
        let result = self.settle(&version_id, port, watch).await;
        if let Err(e) = &result {
            warn!(%version_id, error = %e, "deployment failed");
        }
        if report.send(result).is_err() {
            debug!(%version_id, "deployment report not collected");
        }
    }

    async fn settle(
        &self,
        version_id: &VersionId,
        port: u16,
        watch: WatchHandle<Settlement>,
    ) -> Report {
        let retiring = watch.settled().await??;

        let (retired, backup) = match retiring {
            Some(instance) => {
                let id = instance.version_id().clone();
                let record = self.retire(instance).await;
                if record.is_none() {
                    warn!(version_id = %id, "no backup recorded; rollback to {id} unavailable");
                }
                (Some(id), record)
            }
            None => (None, None),
        };

        info!(%version_id, port, retired = ?retired.as_ref().map(VersionId::as_str), "deployment complete");
        Ok(DeployReport {
            version_id: version_id.clone(),
            port,
            retired,
            backup,
        })
    }

    /// Full deployment: start, health gate, swap, retirement.
    pub async fn deploy(&self, artifact: &Path) -> Result<DeployReport, DeployError> {
        self.begin_deploy(artifact).await?.finish().await
    }

    /// Start a deployment of a recorded version's backup.
    pub async fn begin_rollback(&self, version_id: &VersionId) -> Result<PendingDeployment, DeployError> {
        let record = self
            .inner
            .lock()
            .versions
            .find(version_id)
            .map_err(|_| DeployError::NotFound(version_id.clone()))?;
        info!(%version_id, artifact = %record.backup_path.display(), "rolling back");
        self.begin_deploy(&record.backup_path).await
    }

    pub async fn rollback(&self, version_id: &VersionId) -> Result<DeployReport, DeployError> {
        self.begin_rollback(version_id).await?.finish().await
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.inner.lock();
        StatusSnapshot {
            active: state.active.as_ref().map(Instance::summary),
            standby: state.standby.as_ref().map(Instance::summary),
            strays: state.strays.iter().map(Instance::summary).collect(),
            target: self.inner.router.target(),
            deploying: state.deploying(),
        }
    }

    pub fn versions(&self) -> VersionHistory {
        self.inner.lock().versions.list()
    }

    /// Stop every stray and a failed standby. Returns the stopped versions.
    pub async fn cleanup(&self) -> Vec<VersionId> {
        let doomed = {
            let mut state = self.inner.lock();
            let mut doomed = std::mem::take(&mut state.strays);
            if let Some(failed) = state
                .standby
                .take_if(|c| c.status() == InstanceStatus::Error)
            {
                doomed.push(failed);
            }
            doomed
        };

        let mut stopped = Vec::with_capacity(doomed.len());
        for instance in doomed {
            self.stop_quietly(&instance).await;
            stopped.push(instance.version_id().clone());
        }
        if !stopped.is_empty() {
            info!(count = stopped.len(), "stray instances cleaned up");
        }
        stopped
    }

    /// Abort health watches, let in-flight retirements finish and,
    /// optionally, stop every live instance.
    pub async fn shutdown(&self, stop_instances: bool) {
        self.inner.monitor.stop_all();
        let drivers = std::mem::take(&mut *self.inner.drivers.lock().expect("deploy driver lock"));
        for driver in drivers {
            if let Err(e) = driver.await {
                warn!(error = %e, "deployment driver ended abnormally");
            }
        }
        if !stop_instances {
            return;
        }
        let live: Vec<Instance> = {
            let mut state = self.inner.lock();
            let mut live = std::mem::take(&mut state.strays);
            live.extend(state.standby.take());
            live.extend(state.active.take());
            live
        };
        for instance in &live {
            self.stop_quietly(instance).await;
        }
        for instance in &live {
            instance.handle().wait_exit_timeout(self.inner.retire_grace).await;
        }
        info!(stopped = live.len(), "coordinator shut down");
    }

    async fn stop_quietly(&self, instance: &Instance) {
        match self.inner.supervisor.stop(instance).await {
            Ok(()) => {}
            Err(StopError::AlreadyExited { .. }) => {
                debug!(version_id = %instance.version_id(), "instance had already exited");
            }
            Err(e) => {
                warn!(version_id = %instance.version_id(), error = %e, "failed to stop instance");
            }
        }
    }

    /// Stop a swapped-out instance and record its backup.
    ///
    /// Never undoes the swap. An instance whose process outlives the grace
    /// period is kept as a stray.
    async fn retire(&self, instance: Instance) -> Option<VersionRecord> {
        let inner = &*self.inner;
        let version_id = instance.version_id().clone();

        match inner.supervisor.stop(&instance).await {
            Ok(()) => {}
            Err(StopError::AlreadyExited { outcome, .. }) => {
                warn!(%version_id, ?outcome, "retired instance had already exited");
            }
            Err(e) => warn!(%version_id, error = %e, "stop failed; process may still be running"),
        }
        // Waiting for the exit closes the output sink before the move.
        if instance.handle().wait_exit_timeout(inner.retire_grace).await.is_none() {
            warn!(%version_id, grace = ?inner.retire_grace, "retired process has not exited");
        }

        let in_use: Vec<PathBuf> = {
            let state = inner.lock();
            state
                .active
                .iter()
                .chain(state.standby.iter())
                .map(|i| i.artifact_path().to_path_buf())
                .collect()
        };
        let record = match backup::store(instance.artifact_path(), &version_id, &inner.backup_dir, &in_use).await {
            Ok(backup_path) => Some(VersionRecord {
                version_id: version_id.clone(),
                backup_path,
                recorded_at: Utc::now(),
            }),
            Err(e) => {
                warn!(
                    %version_id,
                    artifact = %instance.artifact_path().display(),
                    error = %e,
                    "backup move failed"
                );
                None
            }
        };

        let mut state = inner.lock();
        if let Some(record) = &record {
            state.versions.record(record.clone());
        }
        if !instance.handle().has_exited() {
            state.strays.push(instance);
        }
        record
    }
}

/// Assembles a `Coordinator`.
pub struct CoordinatorBuilder {
    supervisor: ProcessSupervisor,
    router: TrafficRouter,
    monitor: HealthMonitor,
    ports: PortAllocator,
    probe: Probe,
    policy: WatchPolicy,
    backup_dir: PathBuf,
    retire_grace: Duration,
    history: VersionStore,
}

impl CoordinatorBuilder {
    fn new(supervisor: ProcessSupervisor) -> Self {
        let health = HealthConfig::default();
        Self {
            supervisor,
            router: TrafficRouter::new(),
            monitor: HealthMonitor::new(),
            ports: (&PortRangeConfig::default()).into(),
            probe: cutover_health::from_config(&health),
            policy: (&health).into(),
            backup_dir: PathBuf::from("./bak"),
            retire_grace: Duration::from_secs(10),
            history: VersionStore::new(),
        }
    }

    pub fn router(mut self, router: TrafficRouter) -> Self {
        self.router = router;
        self
    }

    pub fn ports(mut self, ports: PortAllocator) -> Self {
        self.ports = ports;
        self
    }

    pub fn probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    pub fn policy(mut self, policy: WatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn retire_grace(mut self, grace: Duration) -> Self {
        self.retire_grace = grace;
        self
    }

    /// Seed the version history (e.g. rebuilt from the backup directory).
    pub fn history(mut self, history: VersionStore) -> Self {
        self.history = history;
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            inner: Arc::new(Inner {
                state: Mutex::new(DeployState {
                    versions: self.history,
                    ..DeployState::default()
                }),
                supervisor: self.supervisor,
                monitor: self.monitor,
                router: self.router,
                ports: self.ports,
                probe: self.probe,
                policy: self.policy,
                backup_dir: self.backup_dir,
                retire_grace: self.retire_grace,
                drivers: Mutex::new(Vec::new()),
            }),
        }
    }
}
