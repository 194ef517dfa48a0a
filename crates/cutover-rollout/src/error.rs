use std::time::Duration;

use thiserror::Error;

use cutover_core::{StateError, VersionId};
use cutover_health::HealthError;
use cutover_supervisor::{PortError, StartError};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("a deployment is already in progress")]
    Conflict { candidate: Option<VersionId> },

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    NoFreePort(#[from] PortError),

    #[error("candidate {version_id} did not become healthy within {deadline:?}")]
    HealthTimeout {
        version_id: VersionId,
        deadline: Duration,
    },

    #[error("deployment of {0} was interrupted before it settled")]
    Interrupted(VersionId),

    #[error("version not found: {0}")]
    NotFound(VersionId),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Watch(#[from] HealthError),
}
