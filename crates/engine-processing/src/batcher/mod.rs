use model::records::batch::BulkBatch;
use model::records::doc::DocumentRecord;

pub mod dispatcher;

/// Limits for batch assembly and dispatch.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub max_docs_per_batch: usize,
    pub max_bytes_per_batch: usize,
    pub max_concurrent_batches: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_docs_per_batch: 1000,
            max_bytes_per_batch: 10 * 1024 * 1024,
            max_concurrent_batches: 10,
        }
    }
}

/// Groups the document sequence into batches bounded by count and aggregate
/// serialized size. A batch closes when the next record would exceed either
/// bound; a single document larger than the byte limit ships alone.
pub struct BulkBatcher {
    shard_key: String,
    config: BatcherConfig,
    pending: Vec<DocumentRecord>,
    pending_bytes: usize,
    batch_seq: u64,
}

impl BulkBatcher {
    pub fn new(shard_key: impl Into<String>, config: BatcherConfig) -> Self {
        Self {
            shard_key: shard_key.into(),
            config,
            pending: Vec::new(),
            pending_bytes: 0,
            batch_seq: 0,
        }
    }

    /// Adds one record. Returns the closed batch when the record would have
    /// pushed the open batch over a limit; the record itself starts the next
    /// batch.
    pub fn push(&mut self, doc: DocumentRecord) -> Option<BulkBatch> {
        let doc_bytes = doc.size_bytes();
        let would_overflow = !self.pending.is_empty()
            && (self.pending.len() + 1 > self.config.max_docs_per_batch
                || self.pending_bytes + doc_bytes > self.config.max_bytes_per_batch);

        let closed = if would_overflow { self.close() } else { None };

        self.pending_bytes += doc_bytes;
        self.pending.push(doc);

        // Closing on the limit (rather than one past it) keeps a full batch
        // from waiting on the next read.
        if closed.is_none()
            && (self.pending.len() >= self.config.max_docs_per_batch
                || self.pending_bytes >= self.config.max_bytes_per_batch)
        {
            return self.close();
        }

        closed
    }

    /// Closes and returns the open batch, if any. Called once the input
    /// sequence ends.
    pub fn finish(&mut self) -> Option<BulkBatch> {
        self.close()
    }

    fn close(&mut self) -> Option<BulkBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let docs = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;
        self.batch_seq += 1;
        let id = self.make_batch_id(docs[0].ordinal);
        Some(BulkBatch::new(id, docs))
    }

    fn make_batch_id(&self, first_ordinal: u64) -> String {
        let mut h = blake3::Hasher::new();
        h.update(self.shard_key.as_bytes());
        h.update(&self.batch_seq.to_le_bytes());
        h.update(&first_ordinal.to_le_bytes());
        h.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::records::doc::DocOp;

    fn doc(ordinal: u64, body_len: usize) -> DocumentRecord {
        DocumentRecord {
            ordinal,
            id: format!("doc-{ordinal}"),
            routing: None,
            body: vec![b'x'; body_len],
            op: DocOp::Index,
        }
    }

    fn batcher(max_docs: usize, max_bytes: usize) -> BulkBatcher {
        BulkBatcher::new(
            "snap/logs/0",
            BatcherConfig {
                max_docs_per_batch: max_docs,
                max_bytes_per_batch: max_bytes,
                max_concurrent_batches: 1,
            },
        )
    }

    #[test]
    fn closes_on_document_count() {
        let mut batcher = batcher(3, usize::MAX);
        let mut batches = Vec::new();

        for i in 0..7 {
            if let Some(b) = batcher.push(doc(i, 10)) {
                batches.push(b);
            }
        }
        if let Some(b) = batcher.finish() {
            batches.push(b);
        }

        let sizes: Vec<usize> = batches.iter().map(|b| b.doc_count()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        // Ordinal order is preserved across batches.
        assert_eq!(batches[1].docs[0].ordinal, 3);
    }

    #[test]
    fn closes_on_byte_limit() {
        // Each doc is ~100 + overhead bytes; limit fits two but not three.
        let per_doc = doc(0, 100).size_bytes();
        let mut batcher = batcher(usize::MAX, per_doc * 2 + 1);

        let mut batches = Vec::new();
        for i in 0..5 {
            if let Some(b) = batcher.push(doc(i, 100)) {
                batches.push(b);
            }
        }
        if let Some(b) = batcher.finish() {
            batches.push(b);
        }

        for batch in &batches {
            assert!(batch.doc_count() <= 2);
            assert!(batch.size_bytes <= per_doc * 2 + 1);
        }
        let total: usize = batches.iter().map(|b| b.doc_count()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn oversized_document_ships_alone() {
        let mut batcher = batcher(100, 500);
        let mut batches = Vec::new();

        if let Some(b) = batcher.push(doc(0, 10)) {
            batches.push(b);
        }
        // Far over the byte limit: closes the open batch, then ships alone.
        if let Some(b) = batcher.push(doc(1, 5000)) {
            batches.push(b);
        }
        if let Some(b) = batcher.push(doc(2, 10)) {
            batches.push(b);
        }
        if let Some(b) = batcher.finish() {
            batches.push(b);
        }

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].doc_count(), 1);
        assert_eq!(batches[1].doc_count(), 1);
        assert!(batches[1].size_bytes > 500);
        assert_eq!(batches[2].doc_count(), 1);
    }

    #[test]
    fn empty_input_produces_no_batches() {
        let mut batcher = batcher(10, 1000);
        assert!(batcher.finish().is_none());
    }

    #[test]
    fn batch_ids_are_unique() {
        let mut batcher = batcher(1, usize::MAX);
        let a = batcher.push(doc(0, 1)).unwrap();
        let b = batcher.push(doc(1, 1)).unwrap();
        assert_ne!(a.id, b.id);
    }
}
