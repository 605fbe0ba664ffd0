// File: src/index/config.rs

use crate::error::{StoreError, StoreResult};

/// Smallest fan-out that still leaves two entries on each side of a split
pub const MIN_NODE_ENTRIES: usize = 4;

/// Versioned index configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Maximum entries per node before it splits
    pub max_node_entries: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_node_entries: 64,
        }
    }
}

impl IndexConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_node_entries: std::env::var("CHAINKV_MAX_NODE_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_node_entries),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `Config` if `max_node_entries` is below [`MIN_NODE_ENTRIES`]
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_node_entries < MIN_NODE_ENTRIES {
            return Err(StoreError::Config(format!(
                "max_node_entries must be at least {MIN_NODE_ENTRIES}, got {}",
                self.max_node_entries
            )));
        }
        Ok(())
    }
}
