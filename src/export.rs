//! Digest-addressed export tree
//!
//! ```text
//! <root>/manifests/latest
//! <root>/manifests/<digest>
//! <root>/blobs/<digest>
//! ```
//!
//! Concurrent layer fetches write disjoint files, so no locking is needed
//! beyond one writer per digest.

use crate::digest::DigestUtils;
use crate::error::{ExportError, Result};
use std::path::{Path, PathBuf};

pub const MANIFESTS_DIR: &str = "manifests";
pub const BLOBS_DIR: &str = "blobs";
pub const LATEST: &str = "latest";

#[derive(Debug, Clone)]
pub struct ExportLayout {
    root: PathBuf,
}

impl ExportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join(MANIFESTS_DIR)
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    pub fn manifest_path(&self, digest: &str) -> Result<PathBuf> {
        DigestUtils::split(digest)?;
        Ok(self.manifests_dir().join(digest))
    }

    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        DigestUtils::split(digest)?;
        Ok(self.blobs_dir().join(digest))
    }

    /// Remove the whole tree and recreate the empty `manifests/` and `blobs/` directories
    pub async fn reset(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ExportError::io(&self.root, e)),
        }

        for dir in [self.manifests_dir(), self.blobs_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ExportError::io(&dir, e))?;
        }
        Ok(())
    }

    pub async fn write_manifest(&self, data: &[u8], digest: &str) -> Result<PathBuf> {
        let path = self.manifest_path(digest)?;
        write_file(&path, data).await?;
        Ok(path)
    }

    /// Store the top-level document under its digest and as `manifests/latest`
    pub async fn write_top_level(&self, data: &[u8], digest: &str) -> Result<PathBuf> {
        let path = self.write_manifest(data, digest).await?;
        write_file(&self.manifests_dir().join(LATEST), data).await?;
        Ok(path)
    }

    /// Idempotent: rewriting the same digest leaves identical bytes
    pub async fn write_blob(&self, data: &[u8], digest: &str) -> Result<PathBuf> {
        let path = self.blob_path(digest)?;
        write_file(&path, data).await?;
        Ok(path)
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::write(path, data)
        .await
        .map_err(|e| ExportError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reset_clears_previous_contents() {
        let dir = TempDir::new().unwrap();
        let layout = ExportLayout::new(dir.path().join("export"));

        layout.reset().await.unwrap();
        let digest = DigestUtils::compute_docker_digest(b"stale");
        layout.write_blob(b"stale", &digest).await.unwrap();

        layout.reset().await.unwrap();
        assert!(layout.manifests_dir().is_dir());
        assert!(layout.blobs_dir().is_dir());
        assert_eq!(std::fs::read_dir(layout.blobs_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_top_level_written_twice() {
        let dir = TempDir::new().unwrap();
        let layout = ExportLayout::new(dir.path());
        layout.reset().await.unwrap();

        let data = br#"{"schemaVersion":2,"manifests":[]}"#;
        let digest = DigestUtils::compute_docker_digest(data);
        layout.write_top_level(data, &digest).await.unwrap();

        assert_eq!(std::fs::read(layout.manifests_dir().join(LATEST)).unwrap(), data);
        assert_eq!(std::fs::read(layout.manifests_dir().join(&digest)).unwrap(), data);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let layout = ExportLayout::new(dir.path());
        layout.reset().await.unwrap();

        assert!(matches!(
            layout.write_blob(b"x", "../../etc/passwd").await,
            Err(ExportError::InvalidDigest(_))
        ));
        assert!(layout.write_manifest(b"x", "sha256:../x").await.is_err());
    }
}
