// File: src/background/config.rs

use super::indexer::IndexerConfig;

/// Global background jobs configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundConfig {
    /// Disable all background jobs (for testing)
    pub disabled: bool,

    pub indexer: IndexerConfig,
}

impl BackgroundConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            disabled: std::env::var("CHAINKV_BACKGROUND_DISABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            indexer: IndexerConfig::from_env(),
        }
    }
}
