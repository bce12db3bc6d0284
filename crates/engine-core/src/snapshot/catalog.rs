use crate::error::SnapshotError;
use crate::snapshot::blob::SnapshotBlobAccess;
use async_trait::async_trait;
use model::shard::metadata::{IndexInfo, ShardMetadata};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Read-only lookup of shard descriptions and index listings for a snapshot
/// generation.
#[async_trait]
pub trait ShardMetadataSource: Send + Sync {
    async fn shard_metadata(
        &self,
        snapshot: &str,
        index: &str,
        shard: u32,
    ) -> Result<ShardMetadata, SnapshotError>;

    async fn list_indices(&self, snapshot: &str) -> Result<Vec<IndexInfo>, SnapshotError>;
}

/// On-disk manifest of one snapshot generation: `<snapshot>/manifest.json`
/// in the repository. Indices carry per-shard metadata in shard order.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotManifest {
    pub snapshot: String,
    pub indices: Vec<IndexManifest>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexManifest {
    pub name: String,
    pub shards: Vec<ShardMetadata>,
}

/// Catalog backed by the snapshot repository itself: resolves metadata by
/// parsing the generation's manifest through the blob access seam.
pub struct FsSnapshotCatalog {
    blobs: Arc<dyn SnapshotBlobAccess>,
}

impl FsSnapshotCatalog {
    pub fn new(blobs: Arc<dyn SnapshotBlobAccess>) -> Self {
        Self { blobs }
    }

    async fn load_manifest(&self, snapshot: &str) -> Result<SnapshotManifest, SnapshotError> {
        let path = format!("{snapshot}/manifest.json");
        let bytes = self.blobs.read_all(&path).await.map_err(|_| {
            SnapshotError::SnapshotMissing {
                snapshot: snapshot.to_string(),
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::ManifestParse {
            path,
            source: e,
        })
    }
}

#[async_trait]
impl ShardMetadataSource for FsSnapshotCatalog {
    async fn shard_metadata(
        &self,
        snapshot: &str,
        index: &str,
        shard: u32,
    ) -> Result<ShardMetadata, SnapshotError> {
        let manifest = self.load_manifest(snapshot).await?;
        let idx = manifest
            .indices
            .iter()
            .find(|i| i.name == index)
            .ok_or_else(|| SnapshotError::IndexMissing {
                snapshot: snapshot.to_string(),
                index: index.to_string(),
            })?;
        idx.shards
            .iter()
            .find(|s| s.shard == shard)
            .cloned()
            .ok_or_else(|| SnapshotError::ShardMissing {
                index: index.to_string(),
                shard,
            })
    }

    async fn list_indices(&self, snapshot: &str) -> Result<Vec<IndexInfo>, SnapshotError> {
        let manifest = self.load_manifest(snapshot).await?;
        Ok(manifest
            .indices
            .iter()
            .map(|i| IndexInfo {
                name: i.name.clone(),
                shard_count: i.shards.len() as u32,
            })
            .collect())
    }
}
