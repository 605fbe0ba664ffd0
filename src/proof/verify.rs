//! Client-side proof verification
//!
//! Verification only needs proof content and Alh values the caller already
//! trusts; nothing here touches the store.

use crate::error::{StoreError, StoreResult};
use crate::merkle::{self, Hash};

use super::types::{ChainState, DualProof, InclusionProof, SafeItem};

/// Check that `leaf` is included under `root`
#[must_use]
pub fn verify_inclusion(proof: &InclusionProof, leaf: &Hash, root: &Hash) -> bool {
    proof.verify(leaf, root)
}

/// Check that folding the proof's metadata into `source_alh` yields `target_alh`
#[must_use]
pub fn verify_dual(proof: &DualProof, source_alh: &Hash, target_alh: &Hash) -> bool {
    if proof.source_tx_id > proof.target_tx_id {
        return false;
    }
    if proof.metadata.len() as u64 != proof.target_tx_id - proof.source_tx_id {
        return false;
    }
    if proof.source_alh != *source_alh || proof.target_alh != *target_alh {
        return false;
    }

    let mut alh = *source_alh;
    for (expected_id, metadata) in (proof.source_tx_id + 1..).zip(&proof.metadata) {
        if metadata.id != expected_id {
            return false;
        }
        alh = metadata.next_alh(&alh);
    }
    alh == *target_alh
}

impl SafeItem {
    /// Verify the item against a trusted state and return the new trusted state
    ///
    /// Steps:
    /// 1. The entry hashes into `tx_metadata.eh` through the inclusion proof
    /// 2. `Alh(tx)` is recomputed from `prev_alh` and `tx_metadata`
    /// 3. The dual proof links `trusted` and `Alh(tx)` in whichever order they occur
    ///
    /// The returned state is the later of the two.
    ///
    /// # Errors
    ///
    /// Returns `Verification` describing the first check that failed
    pub fn verify(&self, trusted: &ChainState) -> StoreResult<ChainState> {
        let fail = |msg: &str| Err(StoreError::Verification(msg.to_string()));

        if self.tx_metadata.id != self.tx_id {
            return fail("item tx id does not match its metadata");
        }
        if self.inclusion.tree_size != u64::from(self.tx_metadata.entry_count) {
            return fail("inclusion proof tree size does not match entry count");
        }
        let leaf = merkle::leaf_hash(&self.key, &self.value);
        if !verify_inclusion(&self.inclusion, &leaf, &self.tx_metadata.eh) {
            return fail("entry is not included in the transaction root");
        }

        let item_state = ChainState {
            tx_id: self.tx_id,
            alh: self.tx_metadata.next_alh(&self.prev_alh),
        };

        let (older, newer) = if trusted.tx_id <= item_state.tx_id {
            (*trusted, item_state)
        } else {
            (item_state, *trusted)
        };

        if self.dual.source_tx_id != older.tx_id || self.dual.target_tx_id != newer.tx_id {
            return fail("dual proof does not span the trusted state and the item");
        }
        if !verify_dual(&self.dual, &older.alh, &newer.alh) {
            return fail("dual proof does not link the trusted state and the item");
        }

        Ok(newer)
    }
}
