use crate::batcher::{BatcherConfig, BulkBatcher};
use crate::error::DispatchError;
use engine_core::clients::bulk::BulkWriteClient;
use engine_core::metrics::Metrics;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use model::records::batch::BulkBatch;
use model::records::doc::DocumentRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type InFlight = FuturesUnordered<BoxFuture<'static, Result<(u64, u64, u64, u64), DispatchError>>>;

/// What one shard's dispatch run accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchSummary {
    pub docs_dispatched: u64,
    pub bytes_dispatched: u64,
    pub batches_dispatched: u64,
    /// Highest acknowledged ordinal across all completed batches.
    pub last_ordinal: Option<u64>,
}

/// Cloneable watermark shared with the lease-renewal loop: every document
/// with a global ordinal below the cursor has been acknowledged by the
/// target, so a later claimer can resume the stream there. Batches complete
/// out of order; the cursor only ever advances over the contiguous acked
/// prefix.
#[derive(Debug, Clone, Default)]
pub struct ResumeCursor {
    ordinal: Arc<AtomicU64>,
}

impl ResumeCursor {
    pub fn get(&self) -> u64 {
        self.ordinal.load(Ordering::Relaxed)
    }

    fn advance_to(&self, ordinal: u64) {
        self.ordinal.fetch_max(ordinal, Ordering::Relaxed);
    }
}

/// Consumes the document sequence of one shard, assembles bounded batches,
/// and keeps at most `max_concurrent_batches` sends in flight.
///
/// Backpressure: a closed batch waits for a free slot before dispatch, so
/// once the write path stalls, the reader can run ahead by at most the
/// in-flight batches plus the open batch plus the channel's staging buffer.
pub struct BatchDispatcher {
    client: Arc<dyn BulkWriteClient>,
    config: BatcherConfig,
    metrics: Metrics,
    cancel: CancellationToken,
    cursor: ResumeCursor,
}

impl BatchDispatcher {
    pub fn new(
        client: Arc<dyn BulkWriteClient>,
        config: BatcherConfig,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            metrics,
            cancel,
            cursor: ResumeCursor::default(),
        }
    }

    /// Handle on the acked-prefix watermark for this dispatcher's run.
    pub fn resume_cursor(&self) -> ResumeCursor {
        self.cursor.clone()
    }

    pub async fn run(
        &self,
        index: &str,
        shard_key: &str,
        mut rx: mpsc::Receiver<DocumentRecord>,
    ) -> Result<DispatchSummary, DispatchError> {
        let mut batcher = BulkBatcher::new(shard_key, self.config.clone());
        let mut in_flight: InFlight = FuturesUnordered::new();
        let mut outstanding: BTreeSet<u64> = BTreeSet::new();
        let mut summary = DispatchSummary::default();

        loop {
            tokio::select! {
                doc = rx.recv() => match doc {
                    Some(doc) => {
                        if let Some(batch) = batcher.push(doc) {
                            self.dispatch(index, batch, &mut in_flight, &mut outstanding, &mut summary)
                                .await?;
                        }
                    }
                    None => break,
                },
                // In-flight sends make progress even while the input is
                // idle; a resolved send frees its slot immediately.
                Some(resolved) = in_flight.next(), if !in_flight.is_empty() => {
                    self.absorb(resolved?, &mut outstanding, &mut summary);
                }
                _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
            }
        }

        if let Some(batch) = batcher.finish() {
            self.dispatch(index, batch, &mut in_flight, &mut outstanding, &mut summary)
                .await?;
        }

        // Drain the tail of in-flight sends.
        while let Some(resolved) = self.next_resolved(&mut in_flight).await {
            self.absorb(resolved?, &mut outstanding, &mut summary);
        }

        info!(
            index,
            shard = shard_key,
            docs = summary.docs_dispatched,
            batches = summary.batches_dispatched,
            bytes = summary.bytes_dispatched,
            "Shard dispatch finished"
        );
        Ok(summary)
    }

    /// Starts one batch send, first waiting for a slot if the in-flight
    /// limit is reached.
    async fn dispatch(
        &self,
        index: &str,
        batch: BulkBatch,
        in_flight: &mut InFlight,
        outstanding: &mut BTreeSet<u64>,
        summary: &mut DispatchSummary,
    ) -> Result<(), DispatchError> {
        while in_flight.len() >= self.config.max_concurrent_batches {
            match self.next_resolved(in_flight).await {
                Some(resolved) => self.absorb(resolved?, outstanding, summary),
                None => break,
            }
        }

        debug!(
            index,
            batch_id = %batch.id,
            docs = batch.doc_count(),
            bytes = batch.size_bytes,
            "Dispatching bulk batch"
        );

        let client = self.client.clone();
        let index = index.to_string();
        let metrics = self.metrics.clone();
        let first = batch.first_ordinal().unwrap_or(0);
        outstanding.insert(first);
        in_flight.push(
            async move {
                let docs = batch.doc_count() as u64;
                let bytes = batch.size_bytes as u64;
                let last = batch.last_ordinal().unwrap_or(first);
                client
                    .send(&index, &batch)
                    .await
                    .map_err(DispatchError::Write)?;
                metrics.increment_docs_dispatched(docs);
                metrics.increment_bytes_dispatched(bytes);
                metrics.increment_batches(1);
                Ok((docs, bytes, first, last))
            }
            .boxed(),
        );

        Ok(())
    }

    async fn next_resolved(
        &self,
        in_flight: &mut InFlight,
    ) -> Option<Result<(u64, u64, u64, u64), DispatchError>> {
        if in_flight.is_empty() {
            return None;
        }
        tokio::select! {
            resolved = in_flight.next() => resolved,
            _ = self.cancel.cancelled() => Some(Err(DispatchError::Cancelled)),
        }
    }

    fn absorb(
        &self,
        (docs, bytes, first, last): (u64, u64, u64, u64),
        outstanding: &mut BTreeSet<u64>,
        summary: &mut DispatchSummary,
    ) {
        summary.docs_dispatched += docs;
        summary.bytes_dispatched += bytes;
        summary.batches_dispatched += 1;
        summary.last_ordinal = Some(summary.last_ordinal.map_or(last, |prev| prev.max(last)));

        // Batches close in ordinal order, so everything below the earliest
        // still-outstanding batch is acknowledged; with nothing outstanding,
        // everything dispatched so far is.
        outstanding.remove(&first);
        let floor = match outstanding.first() {
            Some(&f) => f,
            None => summary.last_ordinal.map_or(0, |l| l + 1),
        };
        self.cursor.advance_to(floor);
    }
}
