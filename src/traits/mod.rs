//! Trait seams between the log, the indexer and tests

pub mod tx_source;

pub use tx_source::TxSource;
