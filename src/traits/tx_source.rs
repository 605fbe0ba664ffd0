//! Committed-transaction source consumed by the indexer

use tokio::sync::watch;

use crate::error::StoreResult;
use crate::storage::log::Tx;

/// Ordered, gapless source of committed transactions
///
/// Implemented by [`TransactionLog`](crate::storage::log::TransactionLog).
/// The indexer depends on this trait rather than the concrete log so that it
/// can be driven by a test source.
pub trait TxSource: Send + Sync {
    /// Highest committed TxID (0 when empty)
    fn committed_tx_id(&self) -> u64;

    /// Read a committed transaction
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for TxIDs outside `[1, committed_tx_id()]`, or an
    /// I/O or corruption error from the backing store
    fn read_tx(&self, tx_id: u64) -> StoreResult<Tx>;

    /// Receiver that observes every change of the committed head
    fn subscribe(&self) -> watch::Receiver<u64>;
}
