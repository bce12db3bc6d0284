use thiserror::Error;

/// Errors from the shared coordination store itself (storage layer), as
/// opposed to protocol-level outcomes like a lost CAS race, which are values.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Coordination store I/O failure: {0}")]
    Storage(String),

    #[error("Failed to encode store document: {0}")]
    Encode(String),

    #[error("Failed to decode store document at '{key}': {reason}")]
    Decode { key: String, reason: String },
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Coordination store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Worker '{worker}' no longer holds the lease on '{item}'")]
    LeaseLost { item: String, worker: String },

    #[error("Snapshot catalog lookup failed: {0}")]
    Catalog(#[from] SnapshotError),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to read snapshot blob '{path}': {source}")]
    BlobRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot '{snapshot}' not found in repository")]
    SnapshotMissing { snapshot: String },

    #[error("Index '{index}' not present in snapshot '{snapshot}'")]
    IndexMissing { snapshot: String, index: String },

    #[error("Shard {shard} out of range for index '{index}'")]
    ShardMissing { index: String, shard: u32 },

    #[error("Failed to parse snapshot manifest '{path}': {source}")]
    ManifestParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum BulkClientError {
    #[error("Bulk request to '{index}' failed: {source}")]
    Transport {
        index: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Target rejected bulk request for '{index}' with status {status}")]
    Status { index: String, status: u16 },

    #[error("Bulk response for '{index}' could not be parsed")]
    Response {
        index: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Bulk retries exhausted for '{index}': {reason}")]
    RetriesExhausted { index: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Setting '{name}' must be greater than zero")]
    Zero { name: &'static str },

    #[error("Delta migration requires a base snapshot")]
    MissingBaseSnapshot,

    #[error("Base snapshot '{0}' must differ from the snapshot being migrated")]
    BaseEqualsCurrent(String),
}
