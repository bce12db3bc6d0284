use crate::coordination::{
    CasOutcome, CoordinationStore,
    coordinator::encode_record,
    models::{RegistryMarker, SetupLock, WorkItemRecord, registry_marker_key, setup_lock_key, work_item_key},
};
use crate::error::{CoordinationError, StoreError};
use crate::retry::Backoff;
use crate::snapshot::catalog::ShardMetadataSource;
use chrono::{Duration as ChronoDuration, Utc};
use model::core::identifiers::{WorkItemId, WorkerId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PreparerConfig {
    /// Seed delay for the lock-contention backoff; doubles per attempt.
    pub backoff_seed: Duration,
    /// Upper bound on the doubled delay. Setup is expected to be fast
    /// relative to per-shard leases, so contention resolves quickly.
    pub backoff_cap: Duration,
    /// TTL of the setup lock itself, so a crashed preparer cannot wedge the
    /// fleet.
    pub lock_ttl: Duration,
}

impl Default for PreparerConfig {
    fn default() -> Self {
        Self {
            backoff_seed: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            lock_ttl: Duration::from_secs(120),
        }
    }
}

/// One-time, idempotent enumeration of every (index, shard) pair into the
/// coordination store. Every worker calls this on start; whichever wins the
/// setup lock does the work, the rest back off until the completion marker
/// appears.
pub struct RegistryPreparer {
    store: Arc<dyn CoordinationStore>,
    catalog: Arc<dyn ShardMetadataSource>,
    config: PreparerConfig,
}

impl RegistryPreparer {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        catalog: Arc<dyn ShardMetadataSource>,
        config: PreparerConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    /// Blocks (with doubling backoff on lock contention) until the work item
    /// registry for `snapshot` is confirmed populated. Safe to race from any
    /// number of workers.
    pub async fn ensure_work_items_exist(
        &self,
        snapshot: &str,
        index_allowlist: &[String],
        worker_id: &WorkerId,
    ) -> Result<(), CoordinationError> {
        let marker_key = registry_marker_key(snapshot);
        let mut backoff = Backoff::new(self.config.backoff_seed, self.config.backoff_cap);

        loop {
            if self.store.get(&marker_key).await?.is_some() {
                debug!(snapshot, "Work item registry already populated");
                return Ok(());
            }

            if self.try_acquire_lock(snapshot, worker_id).await? {
                let count = self.populate(snapshot, index_allowlist).await?;
                self.write_marker(snapshot, count).await?;
                self.release_lock(snapshot, worker_id).await?;
                info!(snapshot, items = count, "Work item registry populated");
                return Ok(());
            }

            // Lock held elsewhere: liveness, not an error. Wait and re-check.
            let delay = backoff.next_delay();
            debug!(snapshot, delay_ms = delay.as_millis() as u64, "Setup lock contended, backing off");
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_acquire_lock(
        &self,
        snapshot: &str,
        worker_id: &WorkerId,
    ) -> Result<bool, CoordinationError> {
        let key = setup_lock_key(snapshot);
        let ttl = ChronoDuration::from_std(self.config.lock_ttl)
            .unwrap_or_else(|_| ChronoDuration::seconds(120));
        let lock = SetupLock {
            owner: worker_id.clone(),
            expires_at: self.store.now().await? + ttl,
        };
        let bytes = encode(&lock)?;

        match self.store.create_if_absent(&key, &bytes).await? {
            CasOutcome::Applied => return Ok(true),
            CasOutcome::Conflict => {}
        }

        // A lock document exists; take it over only if its holder is gone.
        let doc = match self.store.get(&key).await? {
            Some(doc) => doc,
            None => return Ok(false),
        };
        let current: SetupLock = decode(&key, &doc.bytes)?;
        if current.expires_at > self.store.now().await? {
            return Ok(false);
        }

        let outcome = self
            .store
            .update_versioned(&key, doc.version, &bytes)
            .await?;
        Ok(outcome == CasOutcome::Applied)
    }

    async fn release_lock(
        &self,
        snapshot: &str,
        worker_id: &WorkerId,
    ) -> Result<(), CoordinationError> {
        let key = setup_lock_key(snapshot);
        if let Some(doc) = self.store.get(&key).await? {
            let current: SetupLock = decode(&key, &doc.bytes)?;
            if current.owner != *worker_id {
                return Ok(());
            }
            let released = SetupLock {
                owner: worker_id.clone(),
                expires_at: Utc::now() - ChronoDuration::seconds(1),
            };
            // A lost race here is fine; the lock is spent either way.
            let _ = self
                .store
                .update_versioned(&key, doc.version, &encode(&released)?)
                .await?;
        }
        Ok(())
    }

    /// Creates one work item per (index, shard). Create-if-absent makes a
    /// partially completed earlier run harmless.
    async fn populate(
        &self,
        snapshot: &str,
        index_allowlist: &[String],
    ) -> Result<u64, CoordinationError> {
        let indices = self.catalog.list_indices(snapshot).await?;
        let mut count = 0u64;

        for index in indices {
            if !index_allowlist.is_empty() && !index_allowlist.contains(&index.name) {
                debug!(index = %index.name, "Index not in allowlist, skipping");
                continue;
            }
            for shard in 0..index.shard_count {
                let id = WorkItemId::new(snapshot, index.name.clone(), shard);
                let record = WorkItemRecord::new(id.clone());
                let outcome = self
                    .store
                    .create_if_absent(&work_item_key(&id), &encode_record(&record)?)
                    .await?;
                if outcome == CasOutcome::Applied {
                    count += 1;
                }
            }
        }

        Ok(count)
    }

    async fn write_marker(&self, snapshot: &str, count: u64) -> Result<(), CoordinationError> {
        let marker = RegistryMarker {
            snapshot: snapshot.to_string(),
            item_count: count,
            completed_at: Utc::now(),
        };
        // Conflict means a peer already finished setup; equally done.
        let _ = self
            .store
            .create_if_absent(&registry_marker_key(snapshot), &encode(&marker)?)
            .await?;
        Ok(())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CoordinationError> {
    bincode::serialize(value)
        .map_err(|e| CoordinationError::Store(StoreError::Encode(e.to_string())))
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, CoordinationError> {
    bincode::deserialize(bytes).map_err(|e| {
        CoordinationError::Store(StoreError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    })
}
