use crate::clients::bulk::{BulkResponse, BulkWriteClient};
use crate::error::BulkClientError;
use crate::retry::{RetryDisposition, RetryError, RetryPolicy};
use async_trait::async_trait;
use model::records::batch::BulkBatch;
use model::records::doc::{DocOp, DocumentRecord};
use serde_json::json;
use std::time::Instant;
use tracing::{info, warn};

/// Default `BulkWriteClient` over the OpenSearch `_bulk` API. Builds NDJSON
/// action/source pairs and retries 429 and 5xx responses under the shared
/// retry policy before surfacing a terminal failure.
pub struct OpenSearchBulkClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenSearchBulkClient {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    fn bulk_url(&self, index: &str) -> String {
        format!("{}/{}/_bulk", self.base_url, index)
    }

    /// Serializes the batch into NDJSON `_bulk` body form.
    fn ndjson_body(batch: &BulkBatch) -> Vec<u8> {
        let mut body = Vec::with_capacity(batch.size_bytes + batch.doc_count() * 32);
        for doc in &batch.docs {
            body.extend_from_slice(&action_line(doc));
            body.push(b'\n');
            if doc.op == DocOp::Index {
                body.extend_from_slice(&doc.body);
                body.push(b'\n');
            }
        }
        body
    }

    async fn send_once(&self, index: &str, body: Vec<u8>) -> Result<usize, BulkClientError> {
        let response = self
            .http
            .post(self.bulk_url(index))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| BulkClientError::Transport {
                index: index.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BulkClientError::Status {
                index: index.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BulkClientError::Transport {
                index: index.to_string(),
                source: e,
            })?;
        let payload: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| BulkClientError::Response {
                index: index.to_string(),
                source: e,
            })?;

        // Item-level rejections inside a 200 response: retry only if every
        // failure is a 429, otherwise surface the first hard failure.
        if payload["errors"].as_bool().unwrap_or(false) {
            let items = payload["items"].as_array().cloned().unwrap_or_default();
            let mut rejected = 0u64;
            for item in &items {
                let status = item
                    .as_object()
                    .and_then(|o| o.values().next())
                    .and_then(|action| action["status"].as_u64())
                    .unwrap_or(200);
                if status == 429 {
                    rejected += 1;
                } else if status >= 400 {
                    return Err(BulkClientError::Status {
                        index: index.to_string(),
                        status: status as u16,
                    });
                }
            }
            if rejected > 0 {
                warn!(index, rejected, "Bulk items rejected with 429, retrying batch");
                return Err(BulkClientError::Status {
                    index: index.to_string(),
                    status: 429,
                });
            }
        }

        Ok(payload["items"].as_array().map_or(0, |i| i.len()))
    }
}

fn action_line(doc: &DocumentRecord) -> Vec<u8> {
    let mut meta = serde_json::Map::new();
    meta.insert("_id".to_string(), json!(doc.id));
    if let Some(routing) = &doc.routing {
        meta.insert("routing".to_string(), json!(routing));
    }
    let action = match doc.op {
        DocOp::Index => json!({ "index": meta }),
        DocOp::Delete => json!({ "delete": meta }),
    };
    serde_json::to_vec(&action).unwrap_or_default()
}

fn classify(err: &BulkClientError) -> RetryDisposition {
    match err {
        BulkClientError::Transport { .. } => RetryDisposition::Retry,
        BulkClientError::Status { status, .. } if *status == 429 || *status >= 500 => {
            RetryDisposition::Retry
        }
        _ => RetryDisposition::Stop,
    }
}

#[async_trait]
impl BulkWriteClient for OpenSearchBulkClient {
    async fn send(&self, index: &str, batch: &BulkBatch) -> Result<BulkResponse, BulkClientError> {
        let start = Instant::now();
        let body = Self::ndjson_body(batch);

        let result = self
            .retry
            .run(|| self.send_once(index, body.clone()), classify)
            .await;

        match result {
            Ok(_) => {
                let took = start.elapsed();
                info!(
                    index,
                    batch_id = %batch.id,
                    docs = batch.doc_count(),
                    bytes = batch.size_bytes,
                    duration_ms = took.as_millis() as u64,
                    "Bulk batch written"
                );
                Ok(BulkResponse {
                    took,
                    docs_written: batch.doc_count(),
                })
            }
            Err(RetryError::Fatal(e)) => Err(e),
            Err(RetryError::AttemptsExceeded(e)) => Err(BulkClientError::RetriesExhausted {
                index: index.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
