pub mod blob;
pub mod catalog;
