//! Health monitor error types.

use thiserror::Error;

use cutover_core::VersionId;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("a health watch is already active for {0}")]
    AlreadyWatching(VersionId),

    #[error("health watch for {0} was aborted")]
    Aborted(VersionId),

    #[error("health watch for {0} panicked")]
    Panicked(VersionId),
}
