use engine_core::error::{BulkClientError, SnapshotError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Failed to read shard storage: {0}")]
    Storage(#[from] SnapshotError),

    #[error("Failed to load live-docs bitmap '{path}': {reason}")]
    LiveDocs { path: String, reason: String },

    #[error("Segment '{segment}' document stream ended mid-record at ordinal {ordinal}")]
    Truncated { segment: String, ordinal: u64 },

    #[error("Document channel closed by the consumer")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Bulk write failed terminally: {0}")]
    Write(#[from] BulkClientError),

    #[error("Pipeline cancelled")]
    Cancelled,
}
