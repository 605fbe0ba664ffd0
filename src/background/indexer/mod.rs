// File: src/background/indexer/mod.rs

//! Indexer job
//!
//! Keeps the versioned index in step with the transaction log and publishes
//! the indexed watermark that reads wait on.

pub mod config;
pub mod job;
pub mod watermark;


pub use config::IndexerConfig;
pub use job::Indexer;
pub use watermark::{IndexerState, Watermark, WatermarkPublisher};
