use serde::{Deserialize, Serialize};

/// One index inside a snapshot, as listed by the snapshot catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub shard_count: u32,
}

/// One immutable segment of a shard for one snapshot generation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SegmentFileInfo {
    /// Segment name, stable across generations that share the segment.
    pub name: String,
    /// Maximum document count of the segment (live and deleted slots).
    pub doc_count: u32,
    /// Repository-relative path of the segment's document blob.
    pub docs_file: String,
    /// Repository-relative path of the live-docs bitmap. Absent when the
    /// segment has no deletions (every slot is live).
    pub live_docs_file: Option<String>,
}

/// Description of one shard's on-disk files for one snapshot generation.
/// Derived read-only from the snapshot at claim time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShardMetadata {
    pub index: String,
    pub shard: u32,
    pub total_size_bytes: u64,
    /// Name of the segment commit (segments_N) this generation was cut from.
    pub segment_commit_name: String,
    /// All repository-relative file paths belonging to the shard.
    pub files: Vec<String>,
    /// Segments in commit order.
    pub segments: Vec<SegmentFileInfo>,
}

impl ShardMetadata {
    /// Total number of document slots across all segments, deleted included.
    pub fn max_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count as u64).sum()
    }
}
