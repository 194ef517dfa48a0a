//! Backup storage for retired artifacts.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use cutover_core::VersionId;

/// `<dir>/<version_id><.ext>` for an artifact.
pub(crate) fn backup_path(dir: &Path, version_id: &VersionId, artifact: &Path) -> PathBuf {
    let mut name = OsString::from(version_id.as_str());
    if let Some(ext) = artifact.extension() {
        name.push(".");
        name.push(ext);
    }
    dir.join(name)
}

/// Store `artifact` under `dir`, keyed by `version_id`.
///
/// Artifacts already inside `dir` belong to an earlier record and are
/// copied, as are artifacts a live instance was launched from (`in_use`).
/// Everything else is moved, falling back to copy and remove when a
/// rename is not possible (e.g. across filesystems).
pub(crate) async fn store(
    artifact: &Path,
    version_id: &VersionId,
    dir: &Path,
    in_use: &[PathBuf],
) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let dest = backup_path(dir, version_id, artifact);

    if is_within(artifact, dir).await {
        tokio::fs::copy(artifact, &dest).await?;
        debug!(%version_id, dest = %dest.display(), "backup copied from history");
        return Ok(dest);
    }
    if is_shared(artifact, in_use).await {
        warn!(
            %version_id,
            artifact = %artifact.display(),
            "artifact still backs a live instance; copying instead of moving"
        );
        tokio::fs::copy(artifact, &dest).await?;
        return Ok(dest);
    }

    if let Err(e) = tokio::fs::rename(artifact, &dest).await {
        debug!(%version_id, error = %e, "rename failed, copying instead");
        tokio::fs::copy(artifact, &dest).await?;
        tokio::fs::remove_file(artifact).await?;
    }
    debug!(%version_id, dest = %dest.display(), "artifact moved to backup");
    Ok(dest)
}

async fn is_shared(artifact: &Path, in_use: &[PathBuf]) -> bool {
    let Ok(artifact) = tokio::fs::canonicalize(artifact).await else {
        return false;
    };
    for path in in_use {
        if tokio::fs::canonicalize(path).await.is_ok_and(|p| p == artifact) {
            return true;
        }
    }
    false
}

async fn is_within(path: &Path, dir: &Path) -> bool {
    match (
        tokio::fs::canonicalize(path).await,
        tokio::fs::canonicalize(dir).await,
    ) {
        (Ok(path), Ok(dir)) => path.starts_with(dir),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> VersionId {
        VersionId::parse(s).unwrap()
    }

    #[test]
    fn backup_name_keeps_extension() {
        let dir = Path::new("/srv/bak");
        assert_eq!(
            backup_path(dir, &id("v1"), Path::new("/tmp/app-1.2.jar")),
            PathBuf::from("/srv/bak/v1.jar")
        );
        assert_eq!(
            backup_path(dir, &id("v2"), Path::new("/tmp/server")),
            PathBuf::from("/srv/bak/v2")
        );
    }

    #[tokio::test]
    async fn fresh_artifact_is_moved() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("app.jar");
        std::fs::write(&artifact, b"bytes").unwrap();
        let bak = tmp.path().join("bak");

        let dest = store(&artifact, &id("v1"), &bak, &[]).await.unwrap();
        assert_eq!(dest, bak.join("v1.jar"));
        assert!(!artifact.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn artifact_from_history_is_copied() {
        let tmp = tempfile::tempdir().unwrap();
        let bak = tmp.path().join("bak");
        std::fs::create_dir_all(&bak).unwrap();
        let old = bak.join("v1.jar");
        std::fs::write(&old, b"v1").unwrap();

        let dest = store(&old, &id("v3"), &bak, &[]).await.unwrap();
        assert_eq!(dest, bak.join("v3.jar"));
        assert!(old.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn artifact_in_use_is_copied() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = tmp.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let artifact = uploads.join("app.jar");
        std::fs::write(&artifact, b"bytes").unwrap();
        let bak = tmp.path().join("bak");

        // Same file, reached through a different spelling.
        let live = uploads.join(".").join("app.jar");
        let dest = store(&artifact, &id("v1"), &bak, &[live]).await.unwrap();
        assert!(artifact.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"bytes");

        let unrelated = vec![tmp.path().join("other.jar")];
        store(&artifact, &id("v2"), &bak, &unrelated).await.unwrap();
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn missing_artifact_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = store(&tmp.path().join("gone.jar"), &id("v1"), &tmp.path().join("bak"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
