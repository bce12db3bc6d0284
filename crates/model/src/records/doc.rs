use serde::{Deserialize, Serialize};

/// Operation a document carries into the target write path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocOp {
    Index,
    Delete,
}

/// One source document as it flows through the shard pipeline.
///
/// `ordinal` is the document's position in the read session's global ordinal
/// space (segment doc base + in-segment position); it is monotonic within one
/// session and is the resumption cursor after a partial migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub ordinal: u64,
    pub id: String,
    pub routing: Option<String>,
    pub body: Vec<u8>,
    pub op: DocOp,
}

impl DocumentRecord {
    /// Approximate serialized footprint used for batch byte accounting.
    /// Measured on the body plus the bulk action metadata, not the in-memory
    /// struct.
    pub fn size_bytes(&self) -> usize {
        self.body.len() + self.id.len() + self.routing.as_ref().map_or(0, |r| r.len()) + 64
    }
}

/// On-disk form of one document inside a segment blob. Length-prefixed
/// bincode records, one per live ordinal slot.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub routing: Option<String>,
    pub body: Vec<u8>,
    pub op: DocOp,
}

impl StoredDocument {
    pub fn into_record(self, ordinal: u64) -> DocumentRecord {
        DocumentRecord {
            ordinal,
            id: self.id,
            routing: self.routing,
            body: self.body,
            op: self.op,
        }
    }
}
