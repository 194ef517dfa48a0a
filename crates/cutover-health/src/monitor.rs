//! Health monitor — one deadline-bounded watch task per candidate.
//!
//! `watch` spawns a task that probes the candidate's port every
//! `interval`. The first healthy probe settles the watch as `Ready`;
//! reaching `deadline` first settles it as `TimedOut`. Either way the
//! caller's `on_settled` hook runs exactly once and the task exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use cutover_core::VersionId;
use cutover_core::config::HealthConfig;

use crate::checker::Probe;
use crate::error::HealthError;

/// Probe cadence and hard deadline for one watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPolicy {
    /// Time between probe attempts.
    pub interval: Duration,
    /// Total time allowed before the watch settles as `TimedOut`.
    pub deadline: Duration,
}

impl From<&HealthConfig> for WatchPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            interval: config.interval,
            deadline: config.deadline,
        }
    }
}

/// Terminal result of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Ready,
    TimedOut,
}

type Registry = Arc<Mutex<HashMap<VersionId, AbortHandle>>>;

/// Tracks the active watch tasks.
#[derive(Clone, Default)]
pub struct HealthMonitor {
    watches: Registry,
}

/// Handle to a running watch; resolves to the `on_settled` result.
#[derive(Debug)]
pub struct WatchHandle<T> {
    version_id: VersionId,
    task: JoinHandle<T>,
}

impl<T> WatchHandle<T> {
    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    /// Wait for the watch to settle.
    pub async fn settled(self) -> Result<T, HealthError> {
        self.task.await.map_err(|e| {
            if e.is_cancelled() {
                HealthError::Aborted(self.version_id)
            } else {
                HealthError::Panicked(self.version_id)
            }
        })
    }
}

/// Removes the registry entry when the watch task ends, however it ends.
struct Registration {
    watches: Registry,
    version_id: VersionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut watches) = self.watches.lock() {
            watches.remove(&self.version_id);
        }
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `port` for the instance `version_id`.
    ///
    /// Fails with `AlreadyWatching` if a watch for the same version is
    /// still active.
    pub fn watch<T, F>(
        &self,
        version_id: VersionId,
        port: u16,
        probe: Probe,
        policy: WatchPolicy,
        on_settled: F,
    ) -> Result<WatchHandle<T>, HealthError>
    where
        T: Send + 'static,
        F: FnOnce(HealthOutcome) -> T + Send + 'static,
    {
        let mut watches = self.watches.lock().expect("health watch registry lock");
        if watches.contains_key(&version_id) {
            return Err(HealthError::AlreadyWatching(version_id));
        }

        let registration = Registration {
            watches: self.watches.clone(),
            version_id: version_id.clone(),
        };
        let task_version = version_id.clone();
        let task = tokio::spawn(async move {
            let _registration = registration;
            let outcome = run_watch(&task_version, port, probe, policy).await;
            on_settled(outcome)
        });

        watches.insert(version_id.clone(), task.abort_handle());
        info!(%version_id, port, interval = ?policy.interval, deadline = ?policy.deadline, "health watch started");

        Ok(WatchHandle { version_id, task })
    }

    pub fn is_watching(&self, version_id: &VersionId) -> bool {
        self.watches
            .lock()
            .map(|w| w.contains_key(version_id))
            .unwrap_or(false)
    }

    pub fn active_watches(&self) -> Vec<VersionId> {
        self.watches
            .lock()
            .map(|w| w.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Abort every active watch (orchestrator shutdown only).
    pub fn stop_all(&self) {
        let drained: Vec<_> = match self.watches.lock() {
            Ok(mut watches) => watches.drain().collect(),
            Err(_) => return,
        };
        for (version_id, handle) in drained {
            handle.abort();
            debug!(%version_id, "health watch aborted");
        }
    }
}

async fn run_watch(
    version_id: &VersionId,
    port: u16,
    probe: Probe,
    policy: WatchPolicy,
) -> HealthOutcome {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let polling = async {
        let mut attempts: u32 = 0;
        loop {
            ticker.tick().await;
            attempts += 1;
            let result = probe(port).await;
            if result.is_healthy() {
                return attempts;
            }
            debug!(%version_id, port, attempts, ?result, "candidate not ready yet");
        }
    };

    match tokio::time::timeout_at(started + policy.deadline, polling).await {
        Ok(attempts) => {
            info!(%version_id, port, attempts, elapsed = ?started.elapsed(), "candidate ready");
            HealthOutcome::Ready
        }
        Err(_) => {
            warn!(%version_id, port, deadline = ?policy.deadline, "candidate failed health gate");
            HealthOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{ProbeResult, probe_fn};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn id(s: &str) -> VersionId {
        VersionId::parse(s).unwrap()
    }

    fn policy(interval_ms: u64, deadline_ms: u64) -> WatchPolicy {
        WatchPolicy {
            interval: Duration::from_millis(interval_ms),
            deadline: Duration::from_millis(deadline_ms),
        }
    }

    fn never_ready() -> Probe {
        probe_fn(|_| async { ProbeResult::Failed })
    }

    #[tokio::test(start_paused = true)]
    async fn settles_ready_on_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let probe = probe_fn(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 3 {
                    ProbeResult::Healthy
                } else {
                    ProbeResult::Unhealthy
                }
            }
        });

        let monitor = HealthMonitor::new();
        let handle = monitor
            .watch(id("v1"), 8080, probe, policy(100, 10_000), |outcome| outcome)
            .unwrap();

        assert_eq!(handle.settled().await.unwrap(), HealthOutcome::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_watching(&id("v1")));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_times_out() {
        let monitor = HealthMonitor::new();
        let started = Instant::now();
        let handle = monitor
            .watch(id("v1"), 8080, never_ready(), policy(100, 1_000), |outcome| outcome)
            .unwrap();

        assert_eq!(handle.settled().await.unwrap(), HealthOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn second_watch_for_same_version_is_rejected() {
        let monitor = HealthMonitor::new();
        let first = monitor
            .watch(id("v1"), 8080, never_ready(), policy(100, 1_000), |o| o)
            .unwrap();

        let err = monitor
            .watch(id("v1"), 8080, never_ready(), policy(100, 1_000), |o| o)
            .unwrap_err();
        assert!(matches!(err, HealthError::AlreadyWatching(_)));

        // Other versions are independent.
        let other = monitor
            .watch(id("v2"), 8081, never_ready(), policy(100, 1_000), |o| o)
            .unwrap();
        assert_eq!(monitor.active_watches().len(), 2);

        first.settled().await.unwrap();
        other.settled().await.unwrap();
        assert!(monitor.active_watches().is_empty());

        // Once settled, the version may be watched again.
        assert!(
            monitor
                .watch(id("v1"), 8080, never_ready(), policy(100, 200), |o| o)
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn on_settled_runs_once_with_outcome() {
        let runs = Arc::new(AtomicU32::new(0));
        let seen = runs.clone();
        let monitor = HealthMonitor::new();
        let handle = monitor
            .watch(
                id("v1"),
                8080,
                probe_fn(|_| async { ProbeResult::Healthy }),
                policy(100, 1_000),
                move |outcome| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    format!("{outcome:?}")
                },
            )
            .unwrap();

        assert_eq!(handle.settled().await.unwrap(), "Ready");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_aborts_watches() {
        let monitor = HealthMonitor::new();
        let handle = monitor
            .watch(id("v1"), 8080, never_ready(), policy(100, 60_000), |o| o)
            .unwrap();

        monitor.stop_all();
        assert!(matches!(
            handle.settled().await,
            Err(HealthError::Aborted(_))
        ));
        assert!(monitor.active_watches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_is_cut_by_deadline() {
        let probe = probe_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ProbeResult::Healthy
        });
        let monitor = HealthMonitor::new();
        let handle = monitor
            .watch(id("v1"), 8080, probe, policy(100, 500), |o| o)
            .unwrap();
        assert_eq!(handle.settled().await.unwrap(), HealthOutcome::TimedOut);
    }
}
