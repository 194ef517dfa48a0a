//! cutover rollout — drives one blue-green cutover at a time.
//!
//! # Components
//!
//! - **`coordinator`** — `Coordinator`: admission, candidate start, health
//!   gate, atomic swap, retirement, rollback, stray cleanup, shutdown
//! - **`backup`** — moves a retired artifact into the backup directory
//!
//! All orchestrator state lives behind one mutex inside the coordinator.
//! The lock is never held across a process start, a probe, or a file move.

mod backup;
pub mod coordinator;
pub mod error;

pub use coordinator::{
    Coordinator, CoordinatorBuilder, DeployReport, PendingDeployment, StatusSnapshot,
};
pub use error::DeployError;
