//! Supervisor error types.

use std::path::PathBuf;

use thiserror::Error;

use cutover_core::VersionId;

use crate::process::ExitOutcome;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("artifact {path} is not accessible: {source}")]
    ArtifactMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("failed to create output sink {path}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("process for {version_id} already exited")]
    AlreadyExited {
        version_id: VersionId,
        outcome: Option<ExitOutcome>,
    },

    #[error("failed to signal process for {version_id}: {source}")]
    Signal {
        version_id: VersionId,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TailError {
    #[error("no log sink for version {0}")]
    NotFound(VersionId),

    #[error("failed to open log sink: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("no free port in {start}..{end}")]
    Exhausted { start: u16, end: u16 },
}
