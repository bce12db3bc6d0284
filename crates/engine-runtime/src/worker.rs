use crate::error::WorkerError;
use crate::watchdog::LeaseWatchdog;
use engine_core::clients::bulk::BulkWriteClient;
use engine_core::config::MigrationSettings;
use engine_core::coordination::CoordinationStore;
use engine_core::coordination::coordinator::{ClaimedItem, CoordinatorConfig, WorkCoordinator};
use engine_core::coordination::preparer::{PreparerConfig, RegistryPreparer};
use engine_core::error::{CoordinationError, SnapshotError};
use engine_core::metrics::Metrics;
use engine_core::snapshot::blob::SnapshotBlobAccess;
use engine_core::snapshot::catalog::ShardMetadataSource;
use engine_processing::batcher::BatcherConfig;
use engine_processing::batcher::dispatcher::{BatchDispatcher, DispatchSummary};
use engine_processing::error::DispatchError;
use engine_processing::reader::plan::{ReadPlan, delta_plan, regular_plan};
use engine_processing::reader::session::ReadSession;
use model::core::identifiers::WorkerId;
use model::records::doc::DocumentRecord;
use model::shard::metadata::ShardMetadata;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one attempt at claiming-and-migrating ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// One shard was fully migrated and its work item marked complete.
    Success,
    /// No claimable work item remains for this snapshot.
    NoWorkLeft,
    /// The claimed shard exceeds the configured size ceiling. Its data was
    /// never opened; the work item stays incomplete.
    ShardTooLarge,
    /// The lease on the in-progress shard was lost or could not be renewed.
    /// The process must stop; the next claimer owns the shard now.
    LeaseLost,
}

/// One worker process: prepares the registry, then claims and migrates
/// shards until none are claimable, its lease is lost, or it is shut down.
pub struct ShardWorker {
    settings: MigrationSettings,
    store: Arc<dyn CoordinationStore>,
    catalog: Arc<dyn ShardMetadataSource>,
    blobs: Arc<dyn SnapshotBlobAccess>,
    client: Arc<dyn BulkWriteClient>,
    metrics: Metrics,
    worker_id: WorkerId,
    shutdown: CancellationToken,
}

impl ShardWorker {
    pub fn new(
        settings: MigrationSettings,
        store: Arc<dyn CoordinationStore>,
        catalog: Arc<dyn ShardMetadataSource>,
        blobs: Arc<dyn SnapshotBlobAccess>,
        client: Arc<dyn BulkWriteClient>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            store,
            catalog,
            blobs,
            client,
            metrics: Metrics::new(),
            worker_id: WorkerId::generate(),
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Full worker lifecycle. Returns the outcome of the final attempt:
    /// `NoWorkLeft` on a clean drain, `LeaseLost` when the process must die.
    pub async fn run(&self) -> Result<MigrationOutcome, WorkerError> {
        self.settings.validate()?;

        let preparer = RegistryPreparer::new(
            self.store.clone(),
            self.catalog.clone(),
            PreparerConfig::default(),
        );
        preparer
            .ensure_work_items_exist(
                &self.settings.snapshot,
                &self.settings.index_allowlist,
                &self.worker_id,
            )
            .await?;

        loop {
            if self.shutdown.is_cancelled() {
                info!(worker = %self.worker_id, "Shutdown requested, stopping claim loop");
                return Ok(MigrationOutcome::NoWorkLeft);
            }

            match self.migrate_next_shard().await? {
                MigrationOutcome::Success => continue,
                MigrationOutcome::ShardTooLarge => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Claims one work item and runs its shard through the pipeline.
    pub async fn migrate_next_shard(&self) -> Result<MigrationOutcome, WorkerError> {
        let coordinator = self.coordinator();

        let mut claimed = match coordinator.claim_next_item(&self.worker_id).await? {
            Some(claimed) => claimed,
            None => {
                debug!(worker = %self.worker_id, "No claimable work item");
                return Ok(MigrationOutcome::NoWorkLeft);
            }
        };

        let item = claimed.record.id.clone();
        let meta = self
            .catalog
            .shard_metadata(&item.snapshot, &item.index, item.shard)
            .await?;

        // Size ceiling is judged from metadata alone; an oversized shard's
        // blobs are never opened.
        if meta.total_size_bytes > self.settings.max_shard_size_bytes {
            warn!(
                item = %item,
                size_bytes = meta.total_size_bytes,
                ceiling = self.settings.max_shard_size_bytes,
                "Shard exceeds size ceiling, leaving work item unprocessed"
            );
            self.metrics.increment_failures(1);
            return Ok(MigrationOutcome::ShardTooLarge);
        }

        let plan = self.build_plan(&meta, &item.index, item.shard).await?;
        info!(
            item = %item,
            segments = plan.segments.len(),
            docs = plan.total_kept(),
            attempt = claimed.record.attempts,
            "Starting shard migration"
        );

        let cancel = self.shutdown.child_token();
        let lease_expiry = claimed
            .record
            .lease
            .as_ref()
            .map(|l| l.expires_at)
            .ok_or_else(|| lease_lost(&item.to_string(), &self.worker_id))?;
        let watchdog = LeaseWatchdog::start(lease_expiry, cancel.clone());

        let started = std::time::Instant::now();
        let result = self
            .run_pipeline(&coordinator, &mut claimed, plan, &watchdog, &cancel)
            .await;

        let summary = match result {
            Ok(summary) => summary,
            Err(err) => {
                let lost = self.lease_was_lost(&err, &watchdog);
                watchdog.stop();
                if lost {
                    warn!(item = %item, "Lease lost mid-migration, abandoning shard");
                    return Ok(MigrationOutcome::LeaseLost);
                }
                if self.shutdown.is_cancelled()
                    && matches!(err, WorkerError::Dispatch(DispatchError::Cancelled))
                {
                    info!(item = %item, "Shutdown requested mid-shard, leaving the item to the next claimer");
                    return Ok(MigrationOutcome::NoWorkLeft);
                }
                self.metrics.increment_failures(1);
                return Err(err);
            }
        };

        match coordinator.complete_item(&claimed, &self.worker_id).await {
            Ok(()) => {}
            Err(CoordinationError::LeaseLost { .. }) => {
                watchdog.stop();
                warn!(item = %item, "Lease lost before completion could be recorded");
                return Ok(MigrationOutcome::LeaseLost);
            }
            Err(err) => {
                watchdog.stop();
                return Err(err.into());
            }
        }
        watchdog.stop();

        self.metrics.increment_shards_completed(1);
        let elapsed = started.elapsed();
        let docs_per_sec = summary.docs_dispatched as f64 / elapsed.as_secs_f64().max(1e-3);
        info!(
            item = %item,
            docs = summary.docs_dispatched,
            batches = summary.batches_dispatched,
            bytes = summary.bytes_dispatched,
            elapsed_ms = elapsed.as_millis() as u64,
            docs_per_sec = format!("{docs_per_sec:.0}"),
            "Shard migration complete"
        );
        Ok(MigrationOutcome::Success)
    }

    /// Reader task feeding a bounded channel, dispatcher draining it, and a
    /// renewal tick keeping the lease alive, all under one cancellation
    /// token.
    async fn run_pipeline(
        &self,
        coordinator: &WorkCoordinator,
        claimed: &mut ClaimedItem,
        plan: ReadPlan,
        watchdog: &LeaseWatchdog,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary, WorkerError> {
        let (tx, rx) = mpsc::channel::<DocumentRecord>(self.settings.max_docs_per_batch);

        let start_ordinal = claimed.record.resume_ordinal;
        if start_ordinal > 0 {
            info!(item = %claimed.record.id, start_ordinal, "Resuming shard from persisted cursor");
        }

        let session = ReadSession::new(plan, self.blobs.clone(), self.metrics.clone());
        let metrics = self.metrics.clone();
        let reader = tokio::spawn(async move {
            let sent = session.stream(start_ordinal, tx).await?;
            metrics.increment_docs_read(sent);
            Ok::<u64, engine_processing::error::ReaderError>(sent)
        });

        let dispatcher = BatchDispatcher::new(
            self.client.clone(),
            BatcherConfig {
                max_docs_per_batch: self.settings.max_docs_per_batch,
                max_bytes_per_batch: self.settings.max_bytes_per_batch,
                max_concurrent_batches: self.settings.max_concurrent_batches,
            },
            self.metrics.clone(),
            cancel.clone(),
        );

        let cursor = dispatcher.resume_cursor();
        let item = claimed.record.id.clone();
        let shard_key = item.key();
        let dispatch = dispatcher.run(&item.index, &shard_key, rx);
        tokio::pin!(dispatch);

        let renew_every = renewal_interval(claimed.record.lease_duration());

        let summary = loop {
            tokio::select! {
                result = &mut dispatch => break result?,
                _ = tokio::time::sleep(renew_every) => {
                    claimed.record.resume_ordinal =
                        claimed.record.resume_ordinal.max(cursor.get());
                    match coordinator.renew_lease(claimed, &self.worker_id).await {
                        Ok(()) => {
                            if let Some(lease) = &claimed.record.lease {
                                watchdog.extend(lease.expires_at);
                            }
                        }
                        Err(CoordinationError::LeaseLost { .. }) => {
                            warn!(item = %item, "Lease renewal rejected, cancelling pipeline");
                            cancel.cancel();
                        }
                        Err(err) => {
                            // Store hiccups are survivable while the lease
                            // still has time on the clock.
                            warn!(item = %item, error = %err, "Lease renewal attempt failed");
                        }
                    }
                }
            }
        };

        match reader.await {
            Ok(Ok(_)) => Ok(summary),
            Ok(Err(err)) => Err(err.into()),
            Err(join) => Err(WorkerError::TaskJoin(join.to_string())),
        }
    }

    async fn build_plan(
        &self,
        meta: &ShardMetadata,
        index: &str,
        shard: u32,
    ) -> Result<ReadPlan, WorkerError> {
        let base_snapshot = match &self.settings.base_snapshot {
            Some(base) => base,
            None => return Ok(regular_plan(meta, self.blobs.as_ref()).await?),
        };

        match self.catalog.shard_metadata(base_snapshot, index, shard).await {
            Ok(base_meta) => Ok(delta_plan(&base_meta, meta, self.blobs.as_ref()).await?),
            // A shard with no base-generation counterpart is entirely new;
            // migrate it in full.
            Err(
                SnapshotError::SnapshotMissing { .. }
                | SnapshotError::IndexMissing { .. }
                | SnapshotError::ShardMissing { .. },
            ) => {
                debug!(index, shard, base = %base_snapshot, "No base shard, planning full read");
                Ok(regular_plan(meta, self.blobs.as_ref()).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn coordinator(&self) -> WorkCoordinator {
        WorkCoordinator::new(
            self.store.clone(),
            CoordinatorConfig {
                snapshot: self.settings.snapshot.clone(),
                initial_lease: self.settings.initial_lease(),
                clock_skew_slack: self.settings.clock_skew_slack(),
            },
        )
    }

    fn lease_was_lost(&self, err: &WorkerError, watchdog: &LeaseWatchdog) -> bool {
        if watchdog.fired() {
            return true;
        }
        match err {
            WorkerError::Coordination(CoordinationError::LeaseLost { .. }) => true,
            // Cancellation from renewal rejection, not operator shutdown.
            WorkerError::Dispatch(DispatchError::Cancelled) => !self.shutdown.is_cancelled(),
            _ => false,
        }
    }
}

fn lease_lost(item: &str, worker: &WorkerId) -> WorkerError {
    WorkerError::Coordination(CoordinationError::LeaseLost {
        item: item.to_string(),
        worker: worker.to_string(),
    })
}

/// Renew at half the lease duration, but never tighter than one second.
fn renewal_interval(lease_duration: Duration) -> Duration {
    let half = lease_duration / 2;
    if half < Duration::from_secs(1) {
        Duration::from_secs(1)
    } else {
        half
    }
}
