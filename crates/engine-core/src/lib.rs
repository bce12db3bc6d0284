pub mod clients;
pub mod config;
pub mod coordination;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod snapshot;
