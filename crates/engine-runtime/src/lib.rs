pub mod error;
pub mod watchdog;
pub mod worker;
