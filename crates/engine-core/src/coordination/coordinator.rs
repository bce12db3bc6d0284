use crate::coordination::{
    CasOutcome, CoordinationStore,
    models::{Lease, WorkItemRecord, work_item_prefix_for},
};
use crate::error::{CoordinationError, StoreError};
use chrono::Duration as ChronoDuration;
use model::core::identifiers::WorkerId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A successfully claimed work item together with the store version the next
/// conditional update must match.
#[derive(Debug, Clone)]
pub struct ClaimedItem {
    pub record: WorkItemRecord,
    pub version: u64,
}

impl ClaimedItem {
    pub fn store_key(&self) -> String {
        self.record.store_key()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub snapshot: String,
    pub initial_lease: Duration,
    pub clock_skew_slack: Duration,
}

/// The lease protocol over the shared coordination store: claim, renew,
/// complete. Every mutation is a single-document conditional update; a lost
/// race is never an error, it just means "try another item".
pub struct WorkCoordinator {
    store: Arc<dyn CoordinationStore>,
    config: CoordinatorConfig,
}

impl WorkCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    /// Atomically claims one incomplete work item with no currently valid
    /// lease. Returns `None` when every item is either complete or leased.
    ///
    /// An item whose previous lease expired is re-claimed with double the
    /// previous duration, so systematically slow shards eventually get a
    /// lease long enough to finish under.
    pub async fn claim_next_item(
        &self,
        worker_id: &WorkerId,
    ) -> Result<Option<ClaimedItem>, CoordinationError> {
        let now = self.store.now().await?;
        let prefix = work_item_prefix_for(&self.config.snapshot);

        for (key, doc) in self.store.scan_prefix(&prefix).await? {
            let mut record = decode_record(&key, &doc.bytes)?;
            if record.completed {
                continue;
            }

            let duration = match &record.lease {
                Some(lease) => {
                    if !lease.expired(now, self.config.clock_skew_slack) {
                        continue;
                    }
                    // Prior lease expired unrenewed; grant the next claimer
                    // twice as long.
                    Duration::from_secs(record.lease_duration_secs.saturating_mul(2))
                }
                None => self.config.initial_lease,
            };

            let expires_at = now
                + ChronoDuration::from_std(duration)
                    .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));
            record.lease = Some(Lease {
                owner: worker_id.clone(),
                expires_at,
            });
            record.lease_duration_secs = duration.as_secs();
            record.attempts += 1;

            let bytes = encode_record(&record)?;
            match self
                .store
                .update_versioned(&key, doc.version, &bytes)
                .await?
            {
                CasOutcome::Applied => {
                    info!(
                        item = %record.id,
                        worker = %worker_id,
                        lease_secs = record.lease_duration_secs,
                        attempt = record.attempts,
                        "Claimed work item"
                    );
                    return Ok(Some(ClaimedItem {
                        record,
                        version: doc.version + 1,
                    }));
                }
                CasOutcome::Conflict => {
                    // Another worker got there first; move on.
                    debug!(item = %key, "Lost claim race, trying next item");
                    continue;
                }
            }
        }

        Ok(None)
    }

    /// Extends the expiry of a held lease by its current duration and
    /// persists the pipeline's acked-prefix cursor alongside it. Fails
    /// without side effects if another worker has since claimed the item.
    pub async fn renew_lease(
        &self,
        claimed: &mut ClaimedItem,
        worker_id: &WorkerId,
    ) -> Result<(), CoordinationError> {
        let key = claimed.store_key();
        let current = self.fetch_owned(&key, worker_id).await?;
        let mut record = decode_record(&key, &current.1)?;
        record.resume_ordinal = record.resume_ordinal.max(claimed.record.resume_ordinal);

        let lease = record
            .lease
            .as_mut()
            .ok_or_else(|| lease_lost(&record.id.to_string(), worker_id))?;
        let extension = ChronoDuration::seconds(record.lease_duration_secs as i64);
        lease.expires_at += extension;

        let bytes = encode_record(&record)?;
        match self
            .store
            .update_versioned(&key, current.0, &bytes)
            .await?
        {
            CasOutcome::Applied => {
                debug!(item = %record.id, worker = %worker_id, "Lease renewed");
                claimed.record = record;
                claimed.version = current.0 + 1;
                Ok(())
            }
            CasOutcome::Conflict => Err(lease_lost(&record.id.to_string(), worker_id)),
        }
    }

    /// Marks the item complete. Valid only while the lease is held by
    /// `worker_id`; the completion flag, once set, is never unset.
    pub async fn complete_item(
        &self,
        claimed: &ClaimedItem,
        worker_id: &WorkerId,
    ) -> Result<(), CoordinationError> {
        let key = claimed.store_key();
        let current = self.fetch_owned(&key, worker_id).await?;
        let mut record = decode_record(&key, &current.1)?;

        let now = self.store.now().await?;
        if let Some(lease) = &record.lease {
            if lease.expired(now, self.config.clock_skew_slack) {
                warn!(item = %record.id, "Lease expired before completion could be recorded");
                return Err(lease_lost(&record.id.to_string(), worker_id));
            }
        }

        record.completed = true;
        let bytes = encode_record(&record)?;
        match self
            .store
            .update_versioned(&key, current.0, &bytes)
            .await?
        {
            CasOutcome::Applied => {
                info!(item = %record.id, worker = %worker_id, "Work item completed");
                Ok(())
            }
            CasOutcome::Conflict => Err(lease_lost(&record.id.to_string(), worker_id)),
        }
    }

    /// All work item records for the snapshot, in key order.
    pub async fn list_items(&self) -> Result<Vec<WorkItemRecord>, CoordinationError> {
        let prefix = work_item_prefix_for(&self.config.snapshot);
        let mut items = Vec::new();
        for (key, doc) in self.store.scan_prefix(&prefix).await? {
            items.push(decode_record(&key, &doc.bytes)?);
        }
        Ok(items)
    }

    /// True iff at least one work item for the snapshot is incomplete.
    pub async fn items_are_pending(&self) -> Result<bool, CoordinationError> {
        let prefix = work_item_prefix_for(&self.config.snapshot);
        for (key, doc) in self.store.scan_prefix(&prefix).await? {
            let record = decode_record(&key, &doc.bytes)?;
            if !record.completed {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Re-reads the item and checks it is still owned by `worker_id`.
    async fn fetch_owned(
        &self,
        key: &str,
        worker_id: &WorkerId,
    ) -> Result<(u64, Vec<u8>), CoordinationError> {
        let doc = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| lease_lost(key, worker_id))?;
        let record = decode_record(key, &doc.bytes)?;
        match &record.lease {
            Some(lease) if lease.owner == *worker_id => Ok((doc.version, doc.bytes)),
            _ => Err(lease_lost(&record.id.to_string(), worker_id)),
        }
    }
}

fn lease_lost(item: &str, worker: &WorkerId) -> CoordinationError {
    CoordinationError::LeaseLost {
        item: item.to_string(),
        worker: worker.to_string(),
    }
}

pub(crate) fn decode_record(key: &str, bytes: &[u8]) -> Result<WorkItemRecord, CoordinationError> {
    bincode::deserialize(bytes).map_err(|e| {
        CoordinationError::Store(StoreError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    })
}

pub(crate) fn encode_record(record: &WorkItemRecord) -> Result<Vec<u8>, CoordinationError> {
    bincode::serialize(record)
        .map_err(|e| CoordinationError::Store(StoreError::Encode(e.to_string())))
}
