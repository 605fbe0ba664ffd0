//! chainkv library exports
//!
//! An embedded, tamper-evident key-value store: an append-only, hash-chained
//! transaction log, an asynchronously maintained copy-on-write versioned
//! index, and inclusion/consistency proofs that clients verify against a
//! trusted chain state.

pub mod background;
pub mod config;
pub mod error;
pub mod index;
pub mod merkle;
pub mod proof;
pub mod storage;
pub mod traits;

// Re-exports
pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use proof::{ChainState, DualProof, InclusionProof, ProofEngine, SafeItem};
pub use storage::log::{CommitResult, Kv, Tx, TxMetadata};
pub use storage::{Health, Item, Store};
