pub mod bulk;
pub mod opensearch;
