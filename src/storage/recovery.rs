//! Startup reconciliation between the log and the index
//!
//! The log is recovered first and is authoritative. The index may lag
//! behind it (the indexer replays the gap after start), but it can only be
//! ahead if index writes were not synced while log writes were lost. In that
//! case the index no longer describes the log and is rebuilt from scratch.

use crate::error::StoreResult;
use crate::index::VersionedIndex;
use crate::storage::log::TransactionLog;

/// What reconciliation found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Head of the recovered log
    pub committed_tx: u64,

    /// Index watermark after reconciliation
    pub indexed_tx: u64,

    /// Whether the index had to be discarded
    pub index_reset: bool,
}

impl RecoveryReport {
    /// Transactions the indexer still has to replay
    #[must_use]
    pub fn lag(&self) -> u64 {
        self.committed_tx - self.indexed_tx
    }
}

/// Bring the index in line with the recovered log
///
/// # Errors
///
/// Returns `Io` if the index file cannot be reset
pub fn reconcile(log: &TransactionLog, index: &VersionedIndex) -> StoreResult<RecoveryReport> {
    let committed_tx = log.tx_count();
    let mut index_reset = false;

    if index.indexed_tx() > committed_tx {
        tracing::warn!(
            indexed_tx = index.indexed_tx(),
            committed_tx,
            "Index is ahead of the log, rebuilding it"
        );
        index.reset()?;
        index_reset = true;
    }

    let report = RecoveryReport {
        committed_tx,
        indexed_tx: index.indexed_tx(),
        index_reset,
    };
    tracing::info!(
        committed_tx,
        indexed_tx = report.indexed_tx,
        lag = report.lag(),
        index_reset,
        "Recovery complete"
    );
    Ok(report)
}
