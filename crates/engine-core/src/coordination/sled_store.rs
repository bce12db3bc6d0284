use crate::coordination::{CasOutcome, CoordinationStore, VersionedDoc};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

/// Versioned cell as persisted: a monotonically increasing version counter
/// plus the opaque document bytes.
#[derive(Serialize, Deserialize)]
struct Cell {
    version: u64,
    bytes: Vec<u8>,
}

/// Default coordination store backed by sled. Conditional create/update runs
/// inside a serializable sled transaction, which gives the single-document
/// compare-and-swap the lease protocol relies on.
pub struct SledCoordinationStore {
    db: sled::Db,
}

impl SledCoordinationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn decode_cell(key: &str, bytes: &[u8]) -> Result<Cell, StoreError> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn encode_cell(cell: &Cell) -> Result<Vec<u8>, StoreError> {
        bincode::serialize(cell).map_err(|e| StoreError::Encode(e.to_string()))
    }
}

#[async_trait]
impl CoordinationStore for SledCoordinationStore {
    async fn create_if_absent(&self, key: &str, bytes: &[u8]) -> Result<CasOutcome, StoreError> {
        let encoded = Self::encode_cell(&Cell {
            version: 1,
            bytes: bytes.to_vec(),
        })?;
        let key_owned = key.to_string();

        let result = self
            .db
            .transaction::<_, _, StoreError>(move |tx| {
                if tx.get(key_owned.as_bytes())?.is_some() {
                    return Ok(CasOutcome::Conflict);
                }
                tx.insert(key_owned.as_bytes(), encoded.as_slice())?;
                Ok(CasOutcome::Applied)
            });

        match result {
            Ok(outcome) => Ok(outcome),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    async fn update_versioned(
        &self,
        key: &str,
        expected_version: u64,
        bytes: &[u8],
    ) -> Result<CasOutcome, StoreError> {
        let key_owned = key.to_string();
        let payload = bytes.to_vec();

        let result = self
            .db
            .transaction::<_, _, StoreError>(move |tx| {
                let current = match tx.get(key_owned.as_bytes())? {
                    Some(raw) => Self::decode_cell(&key_owned, &raw)
                        .map_err(ConflictableTransactionError::Abort)?,
                    None => return Ok(CasOutcome::Conflict),
                };

                if current.version != expected_version {
                    return Ok(CasOutcome::Conflict);
                }

                let next = Cell {
                    version: current.version + 1,
                    bytes: payload.clone(),
                };
                let encoded =
                    Self::encode_cell(&next).map_err(ConflictableTransactionError::Abort)?;
                tx.insert(key_owned.as_bytes(), encoded.as_slice())?;
                Ok(CasOutcome::Applied)
            });

        match result {
            Ok(outcome) => Ok(outcome),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError> {
        match self.db.get(key)? {
            Some(raw) => {
                let cell = Self::decode_cell(key, &raw)?;
                Ok(Some(VersionedDoc {
                    version: cell.version,
                    bytes: cell.bytes,
                }))
            }
            None => Ok(None),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, VersionedDoc)>, StoreError> {
        let mut docs = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, raw) = item?;
            let key = String::from_utf8_lossy(&key).to_string();
            let cell = Self::decode_cell(&key, &raw)?;
            docs.push((
                key,
                VersionedDoc {
                    version: cell.version,
                    bytes: cell.bytes,
                },
            ));
        }
        Ok(docs)
    }

    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        Ok(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = SledCoordinationStore::open(dir.path()).unwrap();

        let first = store.create_if_absent("k", b"a").await.unwrap();
        let second = store.create_if_absent("k", b"b").await.unwrap();

        assert_eq!(first, CasOutcome::Applied);
        assert_eq!(second, CasOutcome::Conflict);

        let doc = store.get("k").await.unwrap().unwrap();
        assert_eq!(doc.bytes, b"a");
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn stale_version_loses_the_race() {
        let dir = tempdir().unwrap();
        let store = SledCoordinationStore::open(dir.path()).unwrap();

        store.create_if_absent("k", b"v1").await.unwrap();

        // Two writers read version 1; only one update can apply.
        let winner = store.update_versioned("k", 1, b"v2").await.unwrap();
        let loser = store.update_versioned("k", 1, b"v2-stale").await.unwrap();

        assert_eq!(winner, CasOutcome::Applied);
        assert_eq!(loser, CasOutcome::Conflict);

        let doc = store.get("k").await.unwrap().unwrap();
        assert_eq!(doc.bytes, b"v2");
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn update_of_missing_key_conflicts() {
        let dir = tempdir().unwrap();
        let store = SledCoordinationStore::open(dir.path()).unwrap();

        let outcome = store.update_versioned("ghost", 1, b"x").await.unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
    }

    #[tokio::test]
    async fn scan_prefix_returns_matching_docs_in_order() {
        let dir = tempdir().unwrap();
        let store = SledCoordinationStore::open(dir.path()).unwrap();

        store.create_if_absent("item:a/0", b"0").await.unwrap();
        store.create_if_absent("item:a/1", b"1").await.unwrap();
        store.create_if_absent("setup:a", b"lock").await.unwrap();

        let items = store.scan_prefix("item:").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, "item:a/0");
        assert_eq!(items[1].0, "item:a/1");
    }
}
