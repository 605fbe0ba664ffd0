//! Pinned views of the transaction log

use crate::error::{StoreError, StoreResult};
use crate::proof::{ChainState, DualProof};
use crate::storage::snapshot::SnapshotGuard;

use super::{TransactionLog, Tx};

/// Read-only view of the log bound to the head at creation time
///
/// Later commits are invisible through the snapshot. Call
/// [`release`](Self::release) when done; dropping it has the same effect.
pub struct LogSnapshot<'a> {
    log: &'a TransactionLog,
    state: ChainState,
    _guard: SnapshotGuard<'a>,
}

impl<'a> LogSnapshot<'a> {
    pub(super) fn new(log: &'a TransactionLog, state: ChainState, guard: SnapshotGuard<'a>) -> Self {
        Self {
            log,
            state,
            _guard: guard,
        }
    }

    /// TxID the snapshot is bound to
    #[must_use]
    pub fn tx_id(&self) -> u64 {
        self.state.tx_id
    }

    /// (TxID, Alh) the snapshot is bound to
    #[must_use]
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Read a transaction visible in this snapshot
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for TxIDs above the pinned head
    pub fn read_tx(&self, tx_id: u64) -> StoreResult<Tx> {
        if tx_id > self.state.tx_id {
            return Err(StoreError::NotFound {
                tx_id,
                head: self.state.tx_id,
            });
        }
        self.log.read_tx(tx_id)
    }

    /// Consistency proof between two states visible in this snapshot
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either TxID is above the pinned head
    pub fn dual_proof(&self, a: u64, b: u64) -> StoreResult<DualProof> {
        self.log.dual_proof_within(a, b, self.state.tx_id)
    }

    /// Release the snapshot
    pub fn release(self) {}
}
