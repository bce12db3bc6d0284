use engine_core::error::{CoordinationError, SettingsError};
use engine_runtime::error::WorkerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to open the coordination store at '{path}': {source}")]
    StoreOpen {
        path: String,
        #[source]
        source: sled::Error,
    },

    #[error("Coordination failed: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Migration failed: {0}")]
    Worker(#[from] WorkerError),

    #[error("Failed to serialize status to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),
}
