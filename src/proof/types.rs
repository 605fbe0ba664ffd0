//! Proof and certificate types

use serde::{Deserialize, Serialize};

use crate::merkle::{self, hash_hex, hash_hex_vec, Hash, ALH_SEED};
use crate::storage::log::TxMetadata;

/// A point on the accumulated hash chain: `Alh` after `tx_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub tx_id: u64,
    #[serde(with = "hash_hex")]
    pub alh: Hash,
}

impl ChainState {
    /// State before the first transaction
    #[must_use]
    pub fn genesis() -> Self {
        Self {
            tx_id: 0,
            alh: ALH_SEED,
        }
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Audit path of one entry inside a transaction's Merkle tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Position of the entry in the transaction
    pub leaf_index: u64,

    /// Number of entries in the transaction
    pub tree_size: u64,

    /// Sibling hashes from the leaf up to the root
    #[serde(with = "hash_hex_vec")]
    pub path: Vec<Hash>,
}

impl InclusionProof {
    /// Root implied by this proof for `leaf`, if the path shape is valid
    #[must_use]
    pub fn root_for(&self, leaf: &Hash) -> Option<Hash> {
        merkle::root_from_path(leaf, self.leaf_index, self.tree_size, &self.path)
    }

    /// Check that `leaf` is included under `root`
    #[must_use]
    pub fn verify(&self, leaf: &Hash, root: &Hash) -> bool {
        self.root_for(leaf).is_some_and(|r| r == *root)
    }
}

/// Evidence that the chain at `target_tx_id` extends the chain at `source_tx_id`
///
/// Carries the metadata of every transaction in `source_tx_id + 1 ..= target_tx_id`;
/// the verifier folds them into the source Alh and must land on the target Alh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualProof {
    pub source_tx_id: u64,
    #[serde(with = "hash_hex")]
    pub source_alh: Hash,
    pub target_tx_id: u64,
    #[serde(with = "hash_hex")]
    pub target_alh: Hash,
    pub metadata: Vec<TxMetadata>,
}

impl DualProof {
    /// Whether source and target are the same state
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.source_tx_id == self.target_tx_id
    }

    #[must_use]
    pub fn source(&self) -> ChainState {
        ChainState {
            tx_id: self.source_tx_id,
            alh: self.source_alh,
        }
    }

    #[must_use]
    pub fn target(&self) -> ChainState {
        ChainState {
            tx_id: self.target_tx_id,
            alh: self.target_alh,
        }
    }

    /// Check the proof against independently known Alh values
    #[must_use]
    pub fn verify(&self, source_alh: &Hash, target_alh: &Hash) -> bool {
        super::verify_dual(self, source_alh, target_alh)
    }
}

/// A value together with everything needed to check it against a trusted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,

    /// Transaction that wrote the value
    pub tx_id: u64,

    /// Metadata of that transaction
    pub tx_metadata: TxMetadata,

    /// Alh of the preceding transaction
    #[serde(with = "hash_hex")]
    pub prev_alh: Hash,

    /// Entry inclusion in the transaction's Merkle root
    pub inclusion: InclusionProof,

    /// Consistency between the trusted state and the transaction
    pub dual: DualProof,
}
