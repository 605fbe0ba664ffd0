// File: src/background/indexer/config.rs

/// Indexer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Default bound for reads that wait on the watermark (milliseconds)
    pub wait_timeout_ms: u64,

    /// Transactions indexed per step before yielding to other tasks
    pub batch_size: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5_000,
            batch_size: 256,
        }
    }
}

impl IndexerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            wait_timeout_ms: std::env::var("CHAINKV_INDEXER_WAIT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.wait_timeout_ms),
            batch_size: std::env::var("CHAINKV_INDEXER_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
        }
    }

    pub fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.wait_timeout_ms)
    }
}
