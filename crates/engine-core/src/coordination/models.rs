use chrono::{DateTime, Duration as ChronoDuration, Utc};
use model::core::identifiers::{WorkItemId, WorkerId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exclusive, time-bounded ownership of a work item by one worker. Expires
/// on its own if not renewed; superseded atomically by the next claimer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner: WorkerId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// A lease counts as expired only once the store clock is past the
    /// expiry by more than `slack`, so clock drift alone never evicts a
    /// healthy owner.
    pub fn expired(&self, store_now: DateTime<Utc>, slack: Duration) -> bool {
        let slack = ChronoDuration::from_std(slack).unwrap_or_else(|_| ChronoDuration::zero());
        store_now > self.expires_at + slack
    }
}

/// Coordination-store record for one (snapshot, index, shard) migration
/// unit. Created once by the registry preparer, then only updated through
/// conditional writes; never deleted, only marked complete.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkItemRecord {
    pub id: WorkItemId,
    pub completed: bool,
    pub attempts: u32,
    pub lease: Option<Lease>,
    /// Duration the current lease was granted for. Doubles on every
    /// re-claim that follows an expiry.
    pub lease_duration_secs: u64,
    /// Every document below this global ordinal has been acknowledged by
    /// the target. Persisted with each renewal; a re-claim after an expiry
    /// resumes the stream here instead of replaying the whole shard.
    pub resume_ordinal: u64,
}

impl WorkItemRecord {
    pub fn new(id: WorkItemId) -> Self {
        Self {
            id,
            completed: false,
            attempts: 0,
            lease: None,
            lease_duration_secs: 0,
            resume_ordinal: 0,
        }
    }

    pub fn store_key(&self) -> String {
        work_item_key(&self.id)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }
}

/// Lock document guarding one-time registry setup for a snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SetupLock {
    pub owner: WorkerId,
    pub expires_at: DateTime<Utc>,
}

/// Marker document recording that the registry for a snapshot is fully
/// populated. Written last, under the setup lock.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegistryMarker {
    pub snapshot: String,
    pub item_count: u64,
    pub completed_at: DateTime<Utc>,
}

pub const WORK_ITEM_PREFIX: &str = "item:";
pub const SETUP_LOCK_PREFIX: &str = "setup:";
pub const REGISTRY_MARKER_PREFIX: &str = "registry:";

pub fn work_item_key(id: &WorkItemId) -> String {
    format!("{WORK_ITEM_PREFIX}{}", id.key())
}

pub fn work_item_prefix_for(snapshot: &str) -> String {
    format!("{WORK_ITEM_PREFIX}{snapshot}/")
}

pub fn setup_lock_key(snapshot: &str) -> String {
    format!("{SETUP_LOCK_PREFIX}{snapshot}")
}

pub fn registry_marker_key(snapshot: &str) -> String {
    format!("{REGISTRY_MARKER_PREFIX}{snapshot}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expiry_respects_slack() {
        let now = Utc::now();
        let lease = Lease {
            owner: WorkerId::generate(),
            expires_at: now,
        };

        // Just past expiry but within the slack window: still held.
        let slightly_later = now + ChronoDuration::seconds(3);
        assert!(!lease.expired(slightly_later, Duration::from_secs(5)));

        // Past expiry plus slack: expired.
        let much_later = now + ChronoDuration::seconds(10);
        assert!(lease.expired(much_later, Duration::from_secs(5)));
    }
}
