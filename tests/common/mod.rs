//! Common test utilities and fixtures
//!
//! Shared infrastructure for the integration tests:
//! - Store setup in temporary directories
//! - Helpers for waiting on the indexer
//! - Assertions for proof verification

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

// Re-export commonly used items
pub use assertions::*;
pub use fixtures::*;

// Re-export frequently used external types for convenience
pub use std::sync::Arc;
pub use std::time::Duration;
pub use tokio_util::sync::CancellationToken;
