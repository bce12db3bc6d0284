use crate::error::ReaderError;
use crate::reader::format::read_record_bytes;
use crate::reader::plan::ReadPlan;
use engine_core::error::SnapshotError;
use engine_core::metrics::Metrics;
use engine_core::snapshot::blob::SnapshotBlobAccess;
use model::records::doc::{DocumentRecord, StoredDocument};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Streams one shard's documents, in global ordinal order, into a bounded
/// channel. The session is restartable: a start ordinal recorded from a
/// previous partial run resumes the sequence without re-sending documents
/// already acknowledged (at-least-once across a restart is acceptable; the
/// target's idempotent writes absorb duplicates).
pub struct ReadSession {
    plan: ReadPlan,
    blobs: Arc<dyn SnapshotBlobAccess>,
    metrics: Metrics,
}

impl ReadSession {
    pub fn new(plan: ReadPlan, blobs: Arc<dyn SnapshotBlobAccess>, metrics: Metrics) -> Self {
        Self {
            plan,
            blobs,
            metrics,
        }
    }

    pub fn plan(&self) -> &ReadPlan {
        &self.plan
    }

    /// Streams all kept documents with ordinal >= `start_ordinal` into `tx`.
    /// Returns the number of documents sent.
    ///
    /// A single undecodable document is logged and skipped; the sequence
    /// continues. An underlying storage failure aborts and propagates.
    pub async fn stream(
        &self,
        start_ordinal: u64,
        tx: mpsc::Sender<DocumentRecord>,
    ) -> Result<u64, ReaderError> {
        let mut sent = 0u64;

        for segment in &self.plan.segments {
            if segment.doc_limit() <= start_ordinal {
                debug!(segment = %segment.name, "Segment fully below start ordinal, skipping");
                continue;
            }

            let mut reader = self.blobs.open(&segment.docs_file).await?;

            for local in 0..segment.doc_count {
                let ordinal = segment.doc_base + local as u64;
                let bytes = read_record_bytes(&mut reader)
                    .await
                    .map_err(|e| storage_error(&segment.docs_file, e))?
                    .ok_or_else(|| ReaderError::Truncated {
                        segment: segment.name.clone(),
                        ordinal,
                    })?;

                if !segment.keep.contains(local) || ordinal < start_ordinal {
                    continue;
                }

                let stored: StoredDocument = match bincode::deserialize(&bytes) {
                    Ok(doc) => doc,
                    Err(e) => {
                        // One bad document never fails the shard.
                        warn!(
                            segment = %segment.name,
                            ordinal,
                            error = %e,
                            "Skipping undecodable document"
                        );
                        self.metrics.increment_docs_skipped(1);
                        continue;
                    }
                };

                tx.send(stored.into_record(ordinal))
                    .await
                    .map_err(|_| ReaderError::ChannelClosed)?;
                sent += 1;
            }
        }

        info!(docs = sent, start_ordinal, "Shard read session finished");
        Ok(sent)
    }
}

fn storage_error(path: &str, e: std::io::Error) -> ReaderError {
    ReaderError::Storage(SnapshotError::BlobRead {
        path: path.to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::livedocs::LiveDocs;
    use crate::reader::format::encode_segment;
    use crate::reader::plan::{delta_plan, regular_plan};
    use engine_core::snapshot::blob::FsBlobAccess;
    use model::records::doc::DocOp;
    use model::shard::metadata::{SegmentFileInfo, ShardMetadata};
    use std::path::Path;
    use tempfile::tempdir;

    fn stored(id: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            routing: None,
            body: format!("{{\"id\":\"{id}\"}}").into_bytes(),
            op: DocOp::Index,
        }
    }

    fn write_segment(root: &Path, name: &str, docs: &[StoredDocument]) -> SegmentFileInfo {
        let path = format!("{name}.docs");
        std::fs::write(root.join(&path), encode_segment(docs).unwrap()).unwrap();
        SegmentFileInfo {
            name: name.to_string(),
            doc_count: docs.len() as u32,
            docs_file: path,
            live_docs_file: None,
        }
    }

    fn with_live(root: &Path, mut info: SegmentFileInfo, live: &LiveDocs) -> SegmentFileInfo {
        let path = format!("{}.live", info.name);
        std::fs::write(root.join(&path), live.serialize().unwrap()).unwrap();
        info.live_docs_file = Some(path);
        info
    }

    fn shard(segments: Vec<SegmentFileInfo>) -> ShardMetadata {
        ShardMetadata {
            index: "logs".into(),
            shard: 0,
            total_size_bytes: 0,
            segment_commit_name: "segments_1".into(),
            files: vec![],
            segments,
        }
    }

    async fn collect(session: &ReadSession, start: u64) -> Vec<DocumentRecord> {
        let (tx, mut rx) = mpsc::channel(1024);
        let sent = session.stream(start, tx).await.unwrap();
        let mut docs = Vec::new();
        while let Some(doc) = rx.recv().await {
            docs.push(doc);
        }
        assert_eq!(sent as usize, docs.len());
        docs
    }

    #[tokio::test]
    async fn reads_segments_in_order_with_global_ordinals() {
        let dir = tempdir().unwrap();
        let seg0 = write_segment(dir.path(), "_0", &[stored("a"), stored("b")]);
        let seg1 = write_segment(dir.path(), "_1", &[stored("c")]);
        let meta = shard(vec![seg0, seg1]);

        let blobs = Arc::new(FsBlobAccess::new(dir.path()));
        let plan = regular_plan(&meta, blobs.as_ref()).await.unwrap();
        let session = ReadSession::new(plan, blobs, Metrics::new());

        let docs = collect(&session, 0).await;
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let ordinals: Vec<u64> = docs.iter().map(|d| d.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn deleted_documents_are_not_emitted() {
        let dir = tempdir().unwrap();
        let seg = write_segment(dir.path(), "_0", &[stored("a"), stored("b"), stored("c")]);
        let live = LiveDocs::from_iter([0, 2], 3);
        let seg = with_live(dir.path(), seg, &live);
        let meta = shard(vec![seg]);

        let blobs = Arc::new(FsBlobAccess::new(dir.path()));
        let plan = regular_plan(&meta, blobs.as_ref()).await.unwrap();
        let session = ReadSession::new(plan, blobs, Metrics::new());

        let docs = collect(&session, 0).await;
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        // Ordinals still address the on-disk slot, deletions included.
        assert_eq!(docs[1].ordinal, 2);
    }

    #[tokio::test]
    async fn restart_from_recorded_ordinal_yields_the_remainder() {
        let dir = tempdir().unwrap();
        let all: Vec<StoredDocument> = (0..10).map(|i| stored(&format!("d{i}"))).collect();
        let seg0 = write_segment(dir.path(), "_0", &all[..6]);
        let seg1 = write_segment(dir.path(), "_1", &all[6..]);
        let meta = shard(vec![seg0, seg1]);

        let blobs = Arc::new(FsBlobAccess::new(dir.path()));
        let plan = regular_plan(&meta, blobs.as_ref()).await.unwrap();
        let session = ReadSession::new(plan, blobs, Metrics::new());

        let full = collect(&session, 0).await;
        assert_eq!(full.len(), 10);

        // Resume at the ordinal of the 4th document.
        let resume_at = full[4].ordinal;
        let rest = collect(&session, resume_at).await;
        assert_eq!(rest.len(), 6);
        assert_eq!(
            rest.iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
            full[4..].iter().map(|d| d.id.clone()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn corrupt_document_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();

        // Hand-assemble a segment whose middle record is garbage bytes with
        // a valid length prefix.
        let good_a = bincode::serialize(&stored("a")).unwrap();
        let garbage = vec![0xFFu8; 11];
        let good_c = bincode::serialize(&stored("c")).unwrap();
        let mut blob = Vec::new();
        for record in [&good_a, &garbage, &good_c] {
            blob.extend_from_slice(&(record.len() as u32).to_le_bytes());
            blob.extend_from_slice(record);
        }
        std::fs::write(dir.path().join("_0.docs"), blob).unwrap();

        let meta = shard(vec![SegmentFileInfo {
            name: "_0".into(),
            doc_count: 3,
            docs_file: "_0.docs".into(),
            live_docs_file: None,
        }]);

        let blobs = Arc::new(FsBlobAccess::new(dir.path()));
        let plan = regular_plan(&meta, blobs.as_ref()).await.unwrap();
        let metrics = Metrics::new();
        let session = ReadSession::new(plan, blobs, metrics.clone());

        let docs = collect(&session, 0).await;
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(metrics.snapshot().docs_skipped, 1);
    }

    #[tokio::test]
    async fn missing_blob_aborts_the_session() {
        let dir = tempdir().unwrap();
        let meta = shard(vec![SegmentFileInfo {
            name: "_0".into(),
            doc_count: 2,
            docs_file: "_0.docs".into(),
            live_docs_file: None,
        }]);

        let blobs = Arc::new(FsBlobAccess::new(dir.path()));
        let plan = regular_plan(&meta, blobs.as_ref()).await.unwrap();
        let session = ReadSession::new(plan, blobs, Metrics::new());

        let (tx, _rx) = mpsc::channel(16);
        let err = session.stream(0, tx).await.unwrap_err();
        assert!(matches!(err, ReaderError::Storage(_)));
    }

    #[tokio::test]
    async fn delta_session_yields_exactly_the_new_documents() {
        let dir = tempdir().unwrap();

        // Shared segment _0: base has docs 0 and 2 live; current additionally
        // has doc 3 live, so doc 3 is the segment's delta.
        let seg0_docs: Vec<StoredDocument> = (0..4).map(|i| stored(&format!("s0-{i}"))).collect();
        let seg0 = write_segment(dir.path(), "_0", &seg0_docs);
        let base_live = LiveDocs::from_iter([0, 2], 4);
        let cur_live = LiveDocs::from_iter([0, 2, 3], 4);
        let base_seg0 = with_live(dir.path(), seg0.clone(), &base_live);
        let mut cur_seg0 = seg0.clone();
        let cur_path = "_0.cur.live".to_string();
        std::fs::write(dir.path().join(&cur_path), cur_live.serialize().unwrap()).unwrap();
        cur_seg0.live_docs_file = Some(cur_path);

        // Segment _1 exists only in current.
        let seg1 = write_segment(dir.path(), "_1", &[stored("s1-0"), stored("s1-1")]);

        let base = shard(vec![base_seg0]);
        let current = shard(vec![cur_seg0, seg1]);

        let blobs = Arc::new(FsBlobAccess::new(dir.path()));
        let plan = delta_plan(&base, &current, blobs.as_ref()).await.unwrap();
        let session = ReadSession::new(plan, blobs, Metrics::new());

        let docs = collect(&session, 0).await;
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        // New in _0: doc 3. All of _1 is new.
        assert_eq!(ids, vec!["s0-3", "s1-0", "s1-1"]);

        // Reading the same delta twice is idempotent.
        let again = collect(&session, 0).await;
        assert_eq!(
            again.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            ids
        );
    }
}
