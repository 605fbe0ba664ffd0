//! Store configuration

use std::path::PathBuf;

use crate::background::BackgroundConfig;
use crate::error::{StoreError, StoreResult};
use crate::index::IndexConfig;
use crate::storage::StorageConfig;

/// Complete store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub background: BackgroundConfig,
}

impl Config {
    /// Load from environment variables (prefix `CHAINKV_`)
    pub fn from_env() -> Self {
        Self {
            storage: StorageConfig::from_env(),
            index: IndexConfig::from_env(),
            background: BackgroundConfig::from_env(),
        }
    }

    /// Defaults rooted at `data_dir`
    #[must_use]
    pub fn for_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                data_dir: data_dir.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid value
    pub fn validate(&self) -> StoreResult<()> {
        self.storage.validate()?;
        self.index.validate()?;
        if self.background.indexer.batch_size == 0 {
            return Err(StoreError::Config(
                "indexer batch_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 9] = [
        "CHAINKV_DATA_DIR",
        "CHAINKV_LOG_DIR",
        "CHAINKV_INDEX_DIR",
        "CHAINKV_MAX_SEGMENT_SIZE",
        "CHAINKV_FSYNC",
        "CHAINKV_MAX_NODE_ENTRIES",
        "CHAINKV_BACKGROUND_DISABLED",
        "CHAINKV_INDEXER_WAIT_TIMEOUT_MS",
        "CHAINKV_INDEXER_BATCH_SIZE",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom() {
        clear_env();
        std::env::set_var("CHAINKV_DATA_DIR", "/var/lib/chainkv");
        std::env::set_var("CHAINKV_MAX_SEGMENT_SIZE", "1048576");
        std::env::set_var("CHAINKV_FSYNC", "false");
        std::env::set_var("CHAINKV_MAX_NODE_ENTRIES", "16");
        std::env::set_var("CHAINKV_BACKGROUND_DISABLED", "1");

        let config = Config::from_env();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/chainkv"));
        assert_eq!(config.storage.log_dir(), PathBuf::from("/var/lib/chainkv/log"));
        assert_eq!(config.storage.max_segment_size, 1_048_576);
        assert!(!config.storage.fsync_enabled);
        assert_eq!(config.index.max_node_entries, 16);
        assert!(config.background.disabled);

        clear_env();
    }

    #[test]
    fn test_for_dir() {
        let config = Config::for_dir("/tmp/store");
        assert_eq!(config.storage.index_dir(), PathBuf::from("/tmp/store/index"));
        assert!(config.storage.fsync_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.background.indexer.batch_size = 0;
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }
}
