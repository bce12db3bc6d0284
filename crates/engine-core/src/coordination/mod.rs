use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod coordinator;
pub mod models;
pub mod preparer;
pub mod sled_store;

/// Outcome of a conditional store write. Losing a race is a value, not an
/// error; callers pick another item or back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Conflict,
}

/// A store document plus the version its next conditional update must match.
#[derive(Debug, Clone)]
pub struct VersionedDoc {
    pub version: u64,
    pub bytes: Vec<u8>,
}

/// The shared coordination store: a document store with optimistic,
/// single-document concurrency. This is the only mutable resource shared
/// across worker processes; there are no multi-document transactions.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Creates the document only if no document exists under `key`.
    async fn create_if_absent(&self, key: &str, bytes: &[u8]) -> Result<CasOutcome, StoreError>;

    /// Replaces the document only if its current version equals
    /// `expected_version`.
    async fn update_versioned(
        &self,
        key: &str,
        expected_version: u64,
        bytes: &[u8],
    ) -> Result<CasOutcome, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError>;

    /// Returns all documents whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, VersionedDoc)>, StoreError>;

    /// The store's notion of "now". Lease expiry comparisons use this clock
    /// (with a configured slack) so workers with drifting local clocks are
    /// not starved.
    async fn now(&self) -> Result<DateTime<Utc>, StoreError>;
}
