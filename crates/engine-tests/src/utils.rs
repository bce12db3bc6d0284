#![allow(dead_code)]

use async_trait::async_trait;
use engine_core::clients::bulk::{BulkResponse, BulkWriteClient};
use engine_core::config::MigrationSettings;
use engine_core::coordination::CoordinationStore;
use engine_core::coordination::sled_store::SledCoordinationStore;
use engine_core::error::BulkClientError;
use engine_core::snapshot::blob::{FsBlobAccess, SnapshotBlobAccess};
use engine_core::snapshot::catalog::{
    FsSnapshotCatalog, IndexManifest, ShardMetadataSource, SnapshotManifest,
};
use engine_processing::livedocs::LiveDocs;
use engine_processing::reader::format::encode_segment;
use engine_runtime::worker::ShardWorker;
use model::records::batch::BulkBatch;
use model::records::doc::{DocOp, StoredDocument};
use model::shard::metadata::{SegmentFileInfo, ShardMetadata};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A snapshot repository, a sled coordination store, and a recording target,
/// all rooted in one temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<dyn CoordinationStore>,
    pub catalog: Arc<dyn ShardMetadataSource>,
    pub blobs: Arc<dyn SnapshotBlobAccess>,
    pub client: Arc<RecordingBulkClient>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn SnapshotBlobAccess> = Arc::new(FsBlobAccess::new(dir.path()));
        let store: Arc<dyn CoordinationStore> =
            Arc::new(SledCoordinationStore::open(dir.path().join("coordination")).unwrap());
        Self {
            store,
            catalog: Arc::new(FsSnapshotCatalog::new(blobs.clone())),
            blobs,
            client: Arc::new(RecordingBulkClient::default()),
            dir,
        }
    }

    pub fn repo_root(&self) -> &Path {
        self.dir.path()
    }

    pub fn worker(&self, settings: MigrationSettings) -> ShardWorker {
        self.worker_with_client(settings, self.client.clone())
    }

    pub fn worker_with_client(
        &self,
        settings: MigrationSettings,
        client: Arc<dyn BulkWriteClient>,
    ) -> ShardWorker {
        ShardWorker::new(
            settings,
            self.store.clone(),
            self.catalog.clone(),
            self.blobs.clone(),
            client,
            CancellationToken::new(),
        )
    }
}

pub fn settings(snapshot: &str) -> MigrationSettings {
    MigrationSettings {
        snapshot: snapshot.to_string(),
        ..MigrationSettings::default()
    }
}

pub fn stored(id: &str) -> StoredDocument {
    StoredDocument {
        id: id.to_string(),
        routing: None,
        body: format!("{{\"id\":\"{id}\"}}").into_bytes(),
        op: DocOp::Index,
    }
}

/// Writes one segment's docs blob (and optional live-docs bitmap) under
/// `<snapshot>/<index>/<shard>/` and returns its metadata entry.
pub fn write_segment(
    root: &Path,
    snapshot: &str,
    index: &str,
    shard: u32,
    name: &str,
    docs: &[StoredDocument],
    live: Option<&LiveDocs>,
) -> SegmentFileInfo {
    let bytes = encode_segment(docs).unwrap();
    write_segment_bytes(root, snapshot, index, shard, name, docs.len() as u32, &bytes, live)
}

/// Like `write_segment`, but replaces the record at `corrupt_slot` with
/// garbage that still honors the length-prefix framing.
pub fn write_segment_with_corruption(
    root: &Path,
    snapshot: &str,
    index: &str,
    shard: u32,
    name: &str,
    docs: &[StoredDocument],
    corrupt_slot: usize,
) -> SegmentFileInfo {
    let mut bytes = Vec::new();
    for (slot, doc) in docs.iter().enumerate() {
        let record = if slot == corrupt_slot {
            vec![0xFF, 0xFF, 0xFF, 0xFF]
        } else {
            bincode::serialize(doc).unwrap()
        };
        bytes.extend_from_slice(&(record.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&record);
    }
    write_segment_bytes(root, snapshot, index, shard, name, docs.len() as u32, &bytes, None)
}

fn write_segment_bytes(
    root: &Path,
    snapshot: &str,
    index: &str,
    shard: u32,
    name: &str,
    doc_count: u32,
    bytes: &[u8],
    live: Option<&LiveDocs>,
) -> SegmentFileInfo {
    let dir = root.join(format!("{snapshot}/{index}/{shard}"));
    std::fs::create_dir_all(&dir).unwrap();

    let docs_file = format!("{snapshot}/{index}/{shard}/{name}.docs");
    std::fs::write(root.join(&docs_file), bytes).unwrap();

    let live_docs_file = live.map(|bits| {
        let path = format!("{snapshot}/{index}/{shard}/{name}.live");
        std::fs::write(root.join(&path), bits.serialize().unwrap()).unwrap();
        path
    });

    SegmentFileInfo {
        name: name.to_string(),
        doc_count,
        docs_file,
        live_docs_file,
    }
}

pub fn shard_meta(
    index: &str,
    shard: u32,
    size: u64,
    segments: Vec<SegmentFileInfo>,
) -> ShardMetadata {
    ShardMetadata {
        index: index.to_string(),
        shard,
        total_size_bytes: size,
        segment_commit_name: "segments_1".into(),
        files: segments.iter().map(|s| s.docs_file.clone()).collect(),
        segments,
    }
}

pub fn write_manifest(root: &Path, snapshot: &str, indices: Vec<IndexManifest>) {
    let manifest = SnapshotManifest {
        snapshot: snapshot.to_string(),
        indices,
    };
    std::fs::create_dir_all(root.join(snapshot)).unwrap();
    std::fs::write(
        root.join(format!("{snapshot}/manifest.json")),
        serde_json::to_vec_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

pub fn single_index_manifest(index: &str, shards: Vec<ShardMetadata>) -> Vec<IndexManifest> {
    vec![IndexManifest {
        name: index.to_string(),
        shards,
    }]
}

/// Target double that records every document id it accepts.
#[derive(Default)]
pub struct RecordingBulkClient {
    doc_ids: Mutex<Vec<String>>,
    batches: AtomicU64,
}

impl RecordingBulkClient {
    pub fn doc_ids(&self) -> Vec<String> {
        self.doc_ids.lock().unwrap().clone()
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkWriteClient for RecordingBulkClient {
    async fn send(&self, _index: &str, batch: &BulkBatch) -> Result<BulkResponse, BulkClientError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut ids = self.doc_ids.lock().unwrap();
        for doc in &batch.docs {
            ids.push(doc.id.clone());
        }
        Ok(BulkResponse {
            took: Duration::from_millis(1),
            docs_written: batch.doc_count(),
        })
    }
}

/// Target double that rejects every send after accepting `accept_batches`,
/// simulating a target outage partway through a shard.
pub struct FailingAfterBulkClient {
    pub inner: Arc<RecordingBulkClient>,
    accept_batches: u64,
    sent: AtomicU64,
}

impl FailingAfterBulkClient {
    pub fn new(inner: Arc<RecordingBulkClient>, accept_batches: u64) -> Self {
        Self {
            inner,
            accept_batches,
            sent: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BulkWriteClient for FailingAfterBulkClient {
    async fn send(&self, index: &str, batch: &BulkBatch) -> Result<BulkResponse, BulkClientError> {
        let seen = self.sent.fetch_add(1, Ordering::SeqCst);
        if seen >= self.accept_batches {
            return Err(BulkClientError::Status {
                index: index.to_string(),
                status: 503,
            });
        }
        self.inner.send(index, batch).await
    }
}
