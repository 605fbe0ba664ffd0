// File: src/storage/config.rs

use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};
use crate::storage::log::LogOptions;

/// Smallest accepted segment size
pub const MIN_SEGMENT_SIZE: u64 = 4096;

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Base directory for all storage files
    pub data_dir: PathBuf,

    /// Log directory (default: data_dir/log)
    pub log_dir: Option<PathBuf>,

    /// Index directory (default: data_dir/index)
    pub index_dir: Option<PathBuf>,

    /// Segment size that triggers rollover
    pub max_segment_size: u64,

    /// Enable fsync (disable only for testing)
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chainkv-data"),
            log_dir: None,
            index_dir: None,
            max_segment_size: 64 * 1024 * 1024,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("CHAINKV_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            log_dir: std::env::var("CHAINKV_LOG_DIR").ok().map(PathBuf::from),
            index_dir: std::env::var("CHAINKV_INDEX_DIR").ok().map(PathBuf::from),
            max_segment_size: std::env::var("CHAINKV_MAX_SEGMENT_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_segment_size),
            fsync_enabled: std::env::var("CHAINKV_FSYNC")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    /// Get effective log directory
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("log"))
    }

    /// Get effective index directory
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.index_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("index"))
    }

    /// Options for opening the transaction log
    #[must_use]
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            dir: self.log_dir(),
            max_segment_size: self.max_segment_size,
            fsync_enabled: self.fsync_enabled,
        }
    }

    /// # Errors
    ///
    /// Returns `Config` if the segment size is below [`MIN_SEGMENT_SIZE`]
    /// or the log and index share a directory
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_segment_size < MIN_SEGMENT_SIZE {
            return Err(StoreError::Config(format!(
                "max_segment_size must be at least {MIN_SEGMENT_SIZE}, got {}",
                self.max_segment_size
            )));
        }
        if self.log_dir() == self.index_dir() {
            return Err(StoreError::Config(
                "log and index directories must differ".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_paths() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/data"),
            ..StorageConfig::default()
        };
        assert_eq!(config.log_dir(), PathBuf::from("/data/log"));
        assert_eq!(config.index_dir(), PathBuf::from("/data/index"));

        let config = StorageConfig {
            index_dir: Some(PathBuf::from("/fast/index")),
            ..config
        };
        assert_eq!(config.index_dir(), PathBuf::from("/fast/index"));
        assert_eq!(config.log_options().dir, PathBuf::from("/data/log"));
    }

    #[test]
    fn test_validate() {
        assert!(StorageConfig::default().validate().is_ok());

        let small = StorageConfig {
            max_segment_size: 100,
            ..StorageConfig::default()
        };
        assert!(matches!(small.validate(), Err(StoreError::Config(_))));

        let shared = StorageConfig {
            log_dir: Some(PathBuf::from("/x")),
            index_dir: Some(PathBuf::from("/x")),
            ..StorageConfig::default()
        };
        assert!(matches!(shared.validate(), Err(StoreError::Config(_))));
    }
}
