//! Store error types

use thiserror::Error;

/// Main store error type
#[derive(Debug, Error)]
pub enum StoreError {
    // ========== Input Errors ==========
    /// Malformed input (empty batch, empty key, duplicate key, zero limit)
    #[error("illegal arguments: {0}")]
    IllegalArguments(String),

    // ========== Lookup Errors ==========
    /// Key absent from a transaction or the index; also the end of a reader sequence
    #[error("key not found")]
    KeyNotFound,

    /// Transaction ID outside the committed range
    #[error("tx {tx_id} not found (committed head is {head})")]
    NotFound { tx_id: u64, head: u64 },

    // ========== Durability Errors ==========
    /// Underlying file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data failed an integrity check
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Persisted data uses a format this build does not understand
    #[error("unsupported: {0}")]
    Unsupported(String),

    // ========== Indexing Errors ==========
    /// The indexer stopped; the watermark will not advance again
    #[error("indexing halted: {0}")]
    IndexingHalted(String),

    /// Bounded wait expired before the watermark reached the target
    #[error("timed out waiting for tx {target} to be indexed (indexed up to {indexed})")]
    Timeout { target: u64, indexed: u64 },

    /// Bounded wait was cancelled by its caller
    #[error("wait cancelled")]
    Cancelled,

    // ========== Proof Errors ==========
    /// A proof did not verify against the supplied trusted state
    #[error("verification failed: {0}")]
    Verification(String),

    // ========== Configuration Errors ==========
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Stable machine-readable code for the error
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::IllegalArguments(_) => "ILLEGAL_ARGUMENTS",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::NotFound { .. } => "TX_NOT_FOUND",
            Self::Io(_) => "IO_ERROR",
            Self::Corruption(_) => "CORRUPTION",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::IndexingHalted(_) => "INDEXING_HALTED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Verification(_) => "VERIFICATION_FAILED",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether retrying the same call later may succeed
    ///
    /// Only bounded waits are retryable. Durability failures are never
    /// retried implicitly.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }

    /// Whether this is the "absent key / end of sequence" signal
    #[must_use]
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound { tx_id: 9, head: 4 };
        assert_eq!(err.to_string(), "tx 9 not found (committed head is 4)");

        let err = StoreError::Timeout {
            target: 10,
            indexed: 7,
        };
        assert!(err.to_string().contains("tx 10"));
        assert!(err.to_string().contains("indexed up to 7"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing segment");
        let err: StoreError = io_err.into();

        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(StoreError::Cancelled.is_recoverable());
        assert!(StoreError::Timeout {
            target: 1,
            indexed: 0
        }
        .is_recoverable());

        assert!(!StoreError::Corruption("bad crc".into()).is_recoverable());
        assert!(!StoreError::IndexingHalted("stopped".into()).is_recoverable());
        assert!(!StoreError::KeyNotFound.is_recoverable());
    }

    #[test]
    fn test_is_key_not_found() {
        assert!(StoreError::KeyNotFound.is_key_not_found());
        assert!(!StoreError::NotFound { tx_id: 1, head: 0 }.is_key_not_found());
    }
}
