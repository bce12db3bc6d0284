pub mod batcher;
pub mod error;
pub mod livedocs;
pub mod reader;
