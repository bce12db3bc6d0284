use crate::error::ReaderError;
use crate::livedocs::LiveDocs;
use engine_core::snapshot::blob::SnapshotBlobAccess;
use model::shard::metadata::{SegmentFileInfo, ShardMetadata};
use std::collections::HashMap;
use tracing::debug;

/// One segment selected for a read session. `doc_base` is the running sum of
/// prior segments' maximum document counts, so `doc_base + local ordinal`
/// forms one monotonic, contiguous global ordinal space across the session.
#[derive(Debug, Clone)]
pub struct SegmentView {
    pub name: String,
    pub doc_count: u32,
    pub doc_base: u64,
    pub docs_file: String,
    /// Documents to emit from this segment.
    pub keep: LiveDocs,
}

impl SegmentView {
    /// Global ordinal just past this segment.
    pub fn doc_limit(&self) -> u64 {
        self.doc_base + self.doc_count as u64
    }
}

/// The segments a read session will walk, in output order.
#[derive(Debug, Clone, Default)]
pub struct ReadPlan {
    pub segments: Vec<SegmentView>,
}

impl ReadPlan {
    /// Number of documents the session will emit when started at ordinal 0.
    pub fn total_kept(&self) -> u64 {
        self.segments.iter().map(|s| s.keep.cardinality()).sum()
    }
}

/// Plans a full migration: every live document of every segment, in commit
/// order.
pub async fn regular_plan(
    meta: &ShardMetadata,
    blobs: &dyn SnapshotBlobAccess,
) -> Result<ReadPlan, ReaderError> {
    let mut segments = Vec::with_capacity(meta.segments.len());
    let mut doc_base = 0u64;

    for info in &meta.segments {
        let keep = load_live_docs(info, blobs).await?;
        segments.push(SegmentView {
            name: info.name.clone(),
            doc_count: info.doc_count,
            doc_base,
            docs_file: info.docs_file.clone(),
            keep,
        });
        doc_base += info.doc_count as u64;
    }

    Ok(ReadPlan { segments })
}

/// Plans a delta migration: only documents live in `current` that were
/// absent or deleted in `base`. Segment order follows `current`; segments
/// that cannot contribute are dropped before doc bases are assigned.
pub async fn delta_plan(
    base: &ShardMetadata,
    current: &ShardMetadata,
    blobs: &dyn SnapshotBlobAccess,
) -> Result<ReadPlan, ReaderError> {
    let base_by_name: HashMap<&str, &SegmentFileInfo> =
        base.segments.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut segments = Vec::new();
    let mut doc_base = 0u64;

    for info in &current.segments {
        let delta = match base_by_name.get(info.name.as_str()) {
            // Segment did not exist in the base generation: every live
            // document in it is new.
            None => load_live_docs(info, blobs).await?,

            Some(base_info) => {
                let base_live = match &base_info.live_docs_file {
                    // Base recorded no deletions, so a shared (immutable)
                    // segment cannot have gained documents.
                    None => {
                        debug!(segment = %info.name, "No deletions in base, segment contributes nothing");
                        continue;
                    }
                    Some(path) => {
                        let loaded = load_bitmap(path, base_info.doc_count, blobs).await?;
                        if loaded.is_empty() {
                            debug!(segment = %info.name, "Empty base live set treated as no deletions");
                            continue;
                        }
                        loaded
                    }
                };

                match &info.live_docs_file {
                    // Current tracks deletions: new docs are live now but
                    // not live in base.
                    Some(path) => {
                        let current_live = load_bitmap(path, info.doc_count, blobs).await?;
                        current_live.and_not(&base_live)
                    }
                    // Current tracks no deletions at all: everything outside
                    // base's live set, bounded by the segment's doc count.
                    None => base_live.complement(),
                }
            }
        };

        if delta.is_empty() {
            debug!(segment = %info.name, "Delta bitset empty, dropping segment");
            continue;
        }

        segments.push(SegmentView {
            name: info.name.clone(),
            doc_count: info.doc_count,
            doc_base,
            docs_file: info.docs_file.clone(),
            keep: delta,
        });
        doc_base += info.doc_count as u64;
    }

    Ok(ReadPlan { segments })
}

async fn load_live_docs(
    info: &SegmentFileInfo,
    blobs: &dyn SnapshotBlobAccess,
) -> Result<LiveDocs, ReaderError> {
    match &info.live_docs_file {
        Some(path) => load_bitmap(path, info.doc_count, blobs).await,
        None => Ok(LiveDocs::all_live(info.doc_count)),
    }
}

async fn load_bitmap(
    path: &str,
    doc_count: u32,
    blobs: &dyn SnapshotBlobAccess,
) -> Result<LiveDocs, ReaderError> {
    let bytes = blobs.read_all(path).await?;
    LiveDocs::deserialize(&bytes, doc_count).map_err(|e| ReaderError::LiveDocs {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
