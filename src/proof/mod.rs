//! Inclusion and consistency proofs
//!
//! [`ProofEngine`] composes the transaction log and an index snapshot into
//! certificates; [`verify_inclusion`], [`verify_dual`] and [`SafeItem::verify`]
//! check them using only proof content and trusted Alh values.

mod types;
mod verify;

use crate::error::StoreResult;
use crate::index::IndexSnapshot;
use crate::storage::log::{TransactionLog, Tx};

pub use types::{ChainState, DualProof, InclusionProof, SafeItem};
pub use verify::{verify_dual, verify_inclusion};

/// Stateless composer of proofs over a transaction log
#[derive(Clone, Copy)]
pub struct ProofEngine<'a> {
    log: &'a TransactionLog,
}

impl<'a> ProofEngine<'a> {
    #[must_use]
    pub fn new(log: &'a TransactionLog) -> Self {
        Self { log }
    }

    /// Inclusion proof of `key` in transaction `tx_id`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown transaction or `KeyNotFound`
    pub fn inclusion(&self, tx_id: u64, key: &[u8]) -> StoreResult<InclusionProof> {
        self.log.proof(tx_id, key)
    }

    /// Consistency proof between two TxIDs, in either order
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either TxID is above the head
    pub fn dual(&self, a: u64, b: u64) -> StoreResult<DualProof> {
        self.log.dual_proof(a, b)
    }

    /// Safe read: resolve `key` through the index snapshot, then certify it
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the snapshot has no entry for `key`, or any
    /// error from reading the transaction
    pub fn safe_read(
        &self,
        index: &IndexSnapshot<'_>,
        key: &[u8],
        trusted: ChainState,
    ) -> StoreResult<SafeItem> {
        let tx_id = index.get(key)?;
        let tx = self.log.read_tx(tx_id)?;
        self.certify(&tx, key, trusted)
    }

    /// Certificate for `key` as written by `tx`, relative to `trusted`
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if `tx` does not contain `key`, or `NotFound`
    /// if `trusted` lies beyond the head
    pub fn certify(&self, tx: &Tx, key: &[u8], trusted: ChainState) -> StoreResult<SafeItem> {
        let value = tx.value(key)?.to_vec();
        let inclusion = tx.proof(key)?;
        let dual = self.log.dual_proof(trusted.tx_id, tx.id())?;

        Ok(SafeItem {
            key: key.to_vec(),
            value,
            tx_id: tx.id(),
            tx_metadata: tx.metadata,
            prev_alh: tx.prev_alh,
            inclusion,
            dual,
        })
    }
}
