//! VersionStore — append-only history of retired artifacts.
//!
//! Records are appended once per successful swap-out and never
//! rewritten or removed. `list()` returns a snapshot, so callers may
//! iterate it (as often as they like) while new records are appended.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::types::{VersionId, VersionRecord};

/// Chronological, append-only version history.
#[derive(Debug, Default)]
pub struct VersionStore {
    records: Vec<VersionRecord>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a history by scanning a backup directory.
    ///
    /// Every regular file whose stem is a valid version id becomes a
    /// record; files are ordered by id, which is time-based. Anything
    /// else in the directory is skipped.
    pub fn rebuild_from(dir: &Path) -> std::io::Result<Self> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let version_id = match VersionId::parse(stem) {
                Ok(id) => id,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unrecognised backup file");
                    continue;
                }
            };
            let recorded_at = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            records.push(VersionRecord {
                version_id,
                backup_path: path,
                recorded_at,
            });
        }
        records.sort_by(|a, b| a.version_id.cmp(&b.version_id));
        records.dedup_by(|a, b| a.version_id == b.version_id);
        debug!(dir = %dir.display(), count = records.len(), "version history rebuilt");
        Ok(Self { records })
    }

    /// Append a record.
    pub fn record(&mut self, record: VersionRecord) {
        debug!(version_id = %record.version_id, backup = %record.backup_path.display(), "version recorded");
        self.records.push(record);
    }

    /// Look up a record by version id.
    pub fn find(&self, version_id: &VersionId) -> StateResult<VersionRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| &r.version_id == version_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(version_id.clone()))
    }

    /// Snapshot of the history in insertion order.
    pub fn list(&self) -> VersionHistory {
        VersionHistory(self.records.clone().into())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Immutable snapshot of the version history.
///
/// Cheap to clone and restartable: every call to `iter()` starts over
/// from the oldest record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionHistory(Arc<[VersionRecord]>);

impl Serialize for VersionHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl VersionHistory {
    pub fn iter(&self) -> std::slice::Iter<'_, VersionRecord> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recently retired version.
    pub fn latest(&self) -> Option<&VersionRecord> {
        self.0.last()
    }
}

impl<'a> IntoIterator for &'a VersionHistory {
    type Item = &'a VersionRecord;
    type IntoIter = std::slice::Iter<'a, VersionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(id: &str) -> VersionRecord {
        VersionRecord {
            version_id: VersionId::parse(id).unwrap(),
            backup_path: PathBuf::from(format!("/bak/{id}.jar")),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn record_and_find() {
        let mut store = VersionStore::new();
        store.record(record("v1"));
        store.record(record("v2"));

        let found = store.find(&VersionId::parse("v1").unwrap()).unwrap();
        assert_eq!(found.backup_path, PathBuf::from("/bak/v1.jar"));
    }

    #[test]
    fn find_unknown_is_not_found() {
        let store = VersionStore::new();
        let id = VersionId::parse("missing").unwrap();
        assert_eq!(store.find(&id), Err(StateError::NotFound(id)));
    }

    #[test]
    fn list_is_a_snapshot() {
        let mut store = VersionStore::new();
        store.record(record("v1"));
        let snapshot = store.list();

        store.record(record("v2"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn list_is_restartable_and_ordered() {
        let mut store = VersionStore::new();
        for id in ["a", "b", "c"] {
            store.record(record(id));
        }
        let history = store.list();
        let first: Vec<_> = history.iter().map(|r| r.version_id.to_string()).collect();
        let second: Vec<_> = (&history).into_iter().map(|r| r.version_id.to_string()).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
        assert_eq!(history.latest().unwrap().version_id.as_str(), "c");
    }

    #[test]
    fn rebuild_from_backup_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2024-01-02_00-00-00-0002.jar"), b"b").unwrap();
        std::fs::write(dir.path().join("2024-01-01_00-00-00-0001.jar"), b"a").unwrap();
        std::fs::write(dir.path().join("notes.v2.txt"), b"skip").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let store = VersionStore::rebuild_from(dir.path()).unwrap();
        let ids: Vec<_> = store.list().iter().map(|r| r.version_id.to_string()).collect();
        assert_eq!(
            ids,
            vec!["2024-01-01_00-00-00-0001", "2024-01-02_00-00-00-0002"]
        );
    }

    #[test]
    fn history_serializes_as_array() {
        let mut store = VersionStore::new();
        store.record(record("v1"));
        let json = serde_json::to_value(store.list()).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["version_id"], "v1");
    }
}
