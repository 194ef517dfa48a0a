//! cutover-core — shared domain types for the cutover orchestrator.
//!
//! Holds the pieces every other crate agrees on: the closed instance
//! status enumeration and its transition table, version identifiers,
//! the append-only version history, and the TOML configuration.
//!
//! # Lifecycle
//!
//! ```text
//! Starting ──► Running ──► Retired
//!     │
//!     └──────► Error
//! ```
//!
//! Any other transition is rejected with `StateError::InvalidTransition`.

pub mod config;
pub mod error;
pub mod types;
pub mod versions;

pub use config::{CutoverConfig, ProbeKind, parse_duration};
pub use error::{ConfigError, StateError, StateResult};
pub use types::*;
pub use versions::{VersionHistory, VersionStore};
