use engine_core::error::{CoordinationError, SettingsError, SnapshotError};
use engine_processing::error::{DispatchError, ReaderError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Coordination failed: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Snapshot metadata lookup failed: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Shard read failed: {0}")]
    Reader(#[from] ReaderError),

    #[error("Batch dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Reader task panicked: {0}")]
    TaskJoin(String),
}
