use crate::records::doc::DocumentRecord;

/// An in-flight bulk write unit: documents in non-decreasing ordinal order
/// plus their aggregate serialized size.
#[derive(Debug, Clone)]
pub struct BulkBatch {
    pub id: String,
    pub docs: Vec<DocumentRecord>,
    pub size_bytes: usize,
    pub ts: chrono::DateTime<chrono::Utc>,
}

impl BulkBatch {
    pub fn new(id: String, docs: Vec<DocumentRecord>) -> Self {
        let size_bytes = docs.iter().map(|d| d.size_bytes()).sum();
        Self {
            id,
            docs,
            size_bytes,
            ts: chrono::Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn first_ordinal(&self) -> Option<u64> {
        self.docs.first().map(|d| d.ordinal)
    }

    /// Ordinal of the last document, the resumption cursor once this batch
    /// is acknowledged.
    pub fn last_ordinal(&self) -> Option<u64> {
        self.docs.last().map(|d| d.ordinal)
    }
}
