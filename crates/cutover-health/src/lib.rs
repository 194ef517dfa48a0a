//! cutover-health — readiness gating for candidate instances.
//!
//! A candidate is watched by exactly one background task that probes its
//! port on a fixed interval until the first success or until a hard
//! deadline expires. Probe failures are "not ready yet"; only the
//! deadline is terminal.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   └── one watch task per version id
//!       ├── probe(port) every interval   (tcp connect / http GET / custom)
//!       ├── deadline → HealthOutcome::TimedOut
//!       └── on_settled(outcome)          (runs once, then the task exits)
//! ```
//!
//! The `on_settled` hook lets the owner apply the terminal status change
//! inside its own critical section.

pub mod checker;
pub mod error;
pub mod monitor;

pub use checker::{Probe, ProbeFuture, ProbeResult, from_config, http_probe, probe_fn, tcp_probe};
pub use error::HealthError;
pub use monitor::{HealthMonitor, HealthOutcome, WatchHandle, WatchPolicy};
