use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which documents a delta migration carries over. Only new/updated
/// documents are supported; propagating deletions is a separate concern.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaPolicy {
    UpdatesOnly,
}

/// Recognized configuration surface of the migration engine. Parsed by the
/// CLI, validated once, then passed around read-only.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MigrationSettings {
    /// Snapshot generation being migrated.
    pub snapshot: String,

    /// Indices eligible for migration. Empty means every index in the
    /// snapshot.
    pub index_allowlist: Vec<String>,

    /// Shards reporting a larger total size are never opened; their work
    /// items surface as unprocessable.
    pub max_shard_size_bytes: u64,

    /// Lease duration granted on the first claim of a work item. Doubles on
    /// every re-claim after an expiry.
    pub initial_lease_secs: u64,

    /// Slack allowed between this process's clock and the store's clock when
    /// judging lease expiry.
    pub clock_skew_slack_secs: u64,

    pub max_docs_per_batch: usize,
    pub max_bytes_per_batch: usize,
    pub max_concurrent_batches: usize,

    /// Base generation for delta mode. None means a full migration.
    pub base_snapshot: Option<String>,
    /// Explicit delta policy; valid only together with `base_snapshot`.
    /// A delta run without one behaves as `UpdatesOnly`.
    pub delta_policy: Option<DeltaPolicy>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            snapshot: String::new(),
            index_allowlist: Vec::new(),
            max_shard_size_bytes: 80 * 1024 * 1024 * 1024,
            initial_lease_secs: 600,
            clock_skew_slack_secs: 5,
            max_docs_per_batch: 1000,
            max_bytes_per_batch: 10 * 1024 * 1024,
            max_concurrent_batches: 10,
            base_snapshot: None,
            delta_policy: None,
        }
    }
}

impl MigrationSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_shard_size_bytes == 0 {
            return Err(SettingsError::Zero {
                name: "max_shard_size_bytes",
            });
        }
        if self.initial_lease_secs == 0 {
            return Err(SettingsError::Zero {
                name: "initial_lease_secs",
            });
        }
        if self.max_docs_per_batch == 0 {
            return Err(SettingsError::Zero {
                name: "max_docs_per_batch",
            });
        }
        if self.max_bytes_per_batch == 0 {
            return Err(SettingsError::Zero {
                name: "max_bytes_per_batch",
            });
        }
        if self.max_concurrent_batches == 0 {
            return Err(SettingsError::Zero {
                name: "max_concurrent_batches",
            });
        }
        if let Some(base) = &self.base_snapshot {
            if base == &self.snapshot {
                return Err(SettingsError::BaseEqualsCurrent(base.clone()));
            }
        }
        if self.delta_policy.is_some() && self.base_snapshot.is_none() {
            return Err(SettingsError::MissingBaseSnapshot);
        }
        Ok(())
    }

    pub fn is_delta(&self) -> bool {
        self.base_snapshot.is_some()
    }

    pub fn initial_lease(&self) -> Duration {
        Duration::from_secs(self.initial_lease_secs)
    }

    pub fn clock_skew_slack(&self) -> Duration {
        Duration::from_secs(self.clock_skew_slack_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        let mut settings = MigrationSettings::default();
        settings.snapshot = "snap-1".into();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn base_snapshot_must_differ() {
        let mut settings = MigrationSettings::default();
        settings.snapshot = "snap-1".into();
        settings.base_snapshot = Some("snap-1".into());
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::BaseEqualsCurrent(_))
        ));
    }

    #[test]
    fn delta_policy_requires_a_base_snapshot() {
        let mut settings = MigrationSettings::default();
        settings.snapshot = "snap-1".into();
        settings.delta_policy = Some(DeltaPolicy::UpdatesOnly);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::MissingBaseSnapshot)
        ));

        settings.base_snapshot = Some("snap-0".into());
        assert!(settings.validate().is_ok());
    }
}
