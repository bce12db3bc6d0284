use crate::error::SnapshotError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

pub type BlobReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Byte access into the snapshot repository. The repository is read-only for
/// the whole migration; implementations cover local filesystems and
/// object-storage backends.
#[async_trait]
pub trait SnapshotBlobAccess: Send + Sync {
    /// Opens a repository-relative path as a buffered byte stream.
    async fn open(&self, path: &str) -> Result<BlobReader, SnapshotError>;

    /// Reads a whole blob into memory. Suitable for small metadata files,
    /// not segment document blobs.
    async fn read_all(&self, path: &str) -> Result<Vec<u8>, SnapshotError> {
        let mut reader = self.open(path).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SnapshotError::BlobRead {
                path: path.to_string(),
                source: e,
            })?;
        Ok(buf)
    }
}

/// Local-filesystem repository rooted at a directory.
pub struct FsBlobAccess {
    root: PathBuf,
}

impl FsBlobAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SnapshotBlobAccess for FsBlobAccess {
    async fn open(&self, path: &str) -> Result<BlobReader, SnapshotError> {
        let full = self.root.join(path);
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| SnapshotError::BlobRead {
                path: path.to_string(),
                source: e,
            })?;
        Ok(Box::pin(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_relative_paths_under_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("snap/seg")).unwrap();
        std::fs::write(dir.path().join("snap/seg/docs.bin"), b"payload").unwrap();

        let access = FsBlobAccess::new(dir.path());
        let bytes = access.read_all("snap/seg/docs.bin").await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn missing_blob_is_a_read_error() {
        let dir = tempdir().unwrap();
        let access = FsBlobAccess::new(dir.path());
        let err = access.read_all("nope.bin").await.unwrap_err();
        assert!(matches!(err, SnapshotError::BlobRead { .. }));
    }
}
