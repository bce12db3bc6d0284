pub mod batch;
pub mod doc;
