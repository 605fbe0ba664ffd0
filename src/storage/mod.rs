//! Storage module
//!
//! The transaction log, startup reconciliation with the index, and the
//! [`Store`] facade that ties them to the indexer.

pub mod config;
pub mod engine;
pub mod log;
pub mod recovery;
pub mod snapshot;

// Re-export main storage types
pub use config::StorageConfig;
pub use engine::{Health, Item, Store};
pub use log::{LogOptions, TransactionLog};
pub use recovery::RecoveryReport;
