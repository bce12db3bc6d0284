use crate::error::BulkClientError;
use async_trait::async_trait;
use model::records::batch::BulkBatch;
use std::time::Duration;

/// Result of one resolved bulk dispatch. Retryable failures are handled
/// inside the client; by the time a call returns, the batch either landed or
/// failed terminally.
#[derive(Debug, Clone)]
pub struct BulkResponse {
    pub took: Duration,
    pub docs_written: usize,
}

/// Write path into the target cluster. Implementations own authentication,
/// compression, and retry policy; the pipeline only sees resolved outcomes.
#[async_trait]
pub trait BulkWriteClient: Send + Sync {
    async fn send(&self, index: &str, batch: &BulkBatch) -> Result<BulkResponse, BulkClientError>;
}
