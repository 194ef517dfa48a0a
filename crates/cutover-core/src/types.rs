//! Domain types for the orchestrator state.
//!
//! These are the plain, cloneable views of instances and retired
//! versions. The process handle itself lives in `cutover-supervisor`
//! and never appears here.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

// ── Version identifiers ────────────────────────────────────────────

/// Opaque, file-name-safe identifier for one started artifact.
///
/// Generated as `YYYY-MM-DD_HH-MM-SS-NNNN` (local wall clock plus a
/// per-generator sequence), so ids sort chronologically and never
/// repeat within one orchestrator process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Validate an externally supplied id.
    ///
    /// Ids double as file names for log sinks and backups, so path
    /// separators and dots are rejected.
    pub fn parse(raw: &str) -> StateResult<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(StateError::InvalidVersionId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionId {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.0
    }
}

/// Hands out unique version ids.
///
/// One generator belongs to one supervisor; there is no process-wide
/// counter, so independent orchestrators in the same test binary do not
/// interfere.
#[derive(Debug, Default)]
pub struct VersionIdGenerator {
    seq: AtomicU64,
}

impl VersionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id, stamped with the current local time.
    pub fn next_id(&self) -> VersionId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        VersionId(format!("{stamp}-{seq:04}"))
    }
}

// ── Instance status ────────────────────────────────────────────────

/// Lifecycle status of a managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Process launched, health gate not yet passed.
    Starting,
    /// Health gate passed; this is (or is about to become) the active instance.
    Running,
    /// Health gate deadline expired. Left in place for operator cleanup.
    Error,
    /// Swapped out of the active slot.
    Retired,
}

impl InstanceStatus {
    /// Whether `self -> next` is a legal edge of the lifecycle.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Starting, Running) | (Starting, Error) | (Running, Retired)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition(self, next: InstanceStatus) -> StateResult<InstanceStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// The health gate has settled (successfully or not).
    pub fn is_settled(self) -> bool {
        !matches!(self, InstanceStatus::Starting)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Error => "error",
            InstanceStatus::Retired => "retired",
        };
        f.write_str(s)
    }
}

// ── Views ──────────────────────────────────────────────────────────

/// Read-only snapshot of an instance, safe to hand to API callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSummary {
    pub version_id: VersionId,
    pub status: InstanceStatus,
    /// Port the instance was told to listen on.
    pub port: u16,
    /// OS process id; `None` if the platform did not report one.
    pub pid: Option<u32>,
    /// File the instance was launched from.
    pub artifact_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// A retired artifact that can be rolled back to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionRecord {
    /// Version that was swapped out.
    pub version_id: VersionId,
    /// Its artifact inside the backup directory; rollbacks launch this.
    pub backup_path: PathBuf,
    /// When the backup was taken (file mtime after a rescan).
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_transitions() {
        use InstanceStatus::*;
        assert_eq!(Starting.transition(Running), Ok(Running));
        assert_eq!(Starting.transition(Error), Ok(Error));
        assert_eq!(Running.transition(Retired), Ok(Retired));
    }

    #[test]
    fn rejected_transitions() {
        use InstanceStatus::*;
        for (from, to) in [
            (Retired, Running),
            (Error, Running),
            (Running, Starting),
            (Running, Error),
            (Starting, Retired),
            (Retired, Retired),
        ] {
            assert_eq!(
                from.transition(to),
                Err(StateError::InvalidTransition { from, to }),
                "{from:?} -> {to:?} should be rejected"
            );
        }
    }

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let generator = VersionIdGenerator::new();
        let a = generator.next_id();
        let b = generator.next_id();
        assert_ne!(a, b);
        assert!(a < b);
        assert!(VersionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn version_id_rejects_path_characters() {
        assert!(VersionId::parse("../etc/passwd").is_err());
        assert!(VersionId::parse("a/b").is_err());
        assert!(VersionId::parse("v1.jar").is_err());
        assert!(VersionId::parse("").is_err());
        assert!(VersionId::parse("2024-05-01_10-00-00-0001").is_ok());
    }

    #[test]
    fn version_id_serde_validates() {
        let id: VersionId = serde_json::from_str("\"v1\"").unwrap();
        assert_eq!(id.as_str(), "v1");
        assert!(serde_json::from_str::<VersionId>("\"../x\"").is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&InstanceStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
