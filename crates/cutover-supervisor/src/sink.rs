//! Per-version output sinks.
//!
//! A sink is a plain append-only file `<log_dir>/<version_id>.log`. The
//! child process writes to it through inherited descriptors; readers open
//! it independently, so tailing never contends with the writer.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;

use cutover_core::VersionId;

#[derive(Debug, Clone)]
pub struct LogSinks {
    dir: PathBuf,
}

impl LogSinks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, version_id: &VersionId) -> PathBuf {
        self.dir.join(format!("{version_id}.log"))
    }

    pub fn exists(&self, version_id: &VersionId) -> bool {
        self.path_for(version_id).is_file()
    }

    /// Open (creating if needed) the sink for writing in append mode.
    pub(crate) fn create(&self, version_id: &VersionId) -> io::Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(version_id))
    }
}
