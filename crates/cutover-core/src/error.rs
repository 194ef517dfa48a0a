//! Error types shared across cutover crates.

use thiserror::Error;

use crate::types::{InstanceStatus, VersionId};

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the in-memory orchestrator state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("version not found: {0}")]
    NotFound(VersionId),

    #[error("invalid version id {0:?}: only ASCII letters, digits, '-' and '_' are allowed")]
    InvalidVersionId(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
