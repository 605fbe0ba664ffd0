//! Committed transaction types

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::merkle::{self, hash_hex, Hash};
use crate::proof::InclusionProof;

/// Maximum key length accepted by commit
pub const MAX_KEY_LEN: usize = 1024;

/// Maximum value length accepted by commit (32 MiB)
pub const MAX_VALUE_LEN: usize = 32 * 1024 * 1024;

/// Maximum number of entries in one transaction
pub const MAX_TX_ENTRIES: usize = 1 << 16;

/// One key/value write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kv {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Kv {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Merkle leaf hash of this entry
    #[must_use]
    pub fn leaf_hash(&self) -> Hash {
        merkle::leaf_hash(&self.key, &self.value)
    }
}

/// Transaction metadata bound into the accumulated hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetadata {
    /// Transaction ID
    pub id: u64,

    /// Commit time (Unix nanos)
    pub timestamp: i64,

    /// Number of entries (the Merkle tree size)
    pub entry_count: u32,

    /// Merkle root over the entries
    #[serde(with = "hash_hex")]
    pub eh: Hash,
}

impl TxMetadata {
    /// Alh of this transaction given the Alh of its predecessor
    #[must_use]
    pub fn next_alh(&self, prev_alh: &Hash) -> Hash {
        merkle::chain_alh(prev_alh, self.id, self.timestamp, self.entry_count, &self.eh)
    }
}

/// Acknowledgement returned by a durable commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub tx_id: u64,
    #[serde(with = "hash_hex")]
    pub eh: Hash,
    #[serde(with = "hash_hex")]
    pub alh: Hash,
}

/// A committed transaction read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub metadata: TxMetadata,

    /// Alh after this transaction
    pub alh: Hash,

    /// Alh before this transaction
    pub prev_alh: Hash,

    /// Entries in commit order
    pub entries: Vec<Kv>,
}

impl Tx {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.metadata.id
    }

    /// Leaf hashes in commit order
    #[must_use]
    pub fn leaf_hashes(&self) -> Vec<Hash> {
        self.entries.iter().map(Kv::leaf_hash).collect()
    }

    /// Value written for `key` in this transaction
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the transaction does not contain `key`
    pub fn value(&self, key: &[u8]) -> StoreResult<&[u8]> {
        self.position(key)
            .map(|i| self.entries[i].value.as_slice())
    }

    /// Inclusion proof of `key` under this transaction's Merkle root
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the transaction does not contain `key`
    pub fn proof(&self, key: &[u8]) -> StoreResult<InclusionProof> {
        let index = self.position(key)?;
        let leaves = self.leaf_hashes();
        let path = merkle::inclusion_path(&leaves, index).ok_or(StoreError::KeyNotFound)?;
        Ok(InclusionProof {
            leaf_index: index as u64,
            tree_size: leaves.len() as u64,
            path,
        })
    }

    fn position(&self, key: &[u8]) -> StoreResult<usize> {
        self.entries
            .iter()
            .position(|kv| kv.key == key)
            .ok_or(StoreError::KeyNotFound)
    }
}

/// Reject batches that cannot be committed
///
/// # Errors
///
/// Returns `IllegalArguments` for an empty batch, an empty or oversized key,
/// an oversized value, or a key repeated inside the batch
pub fn validate_entries(entries: &[Kv]) -> StoreResult<()> {
    if entries.is_empty() {
        return Err(StoreError::IllegalArguments(
            "transaction must contain at least one entry".into(),
        ));
    }
    if entries.len() > MAX_TX_ENTRIES {
        return Err(StoreError::IllegalArguments(format!(
            "transaction has {} entries, maximum is {MAX_TX_ENTRIES}",
            entries.len()
        )));
    }

    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    for kv in entries {
        if kv.key.is_empty() {
            return Err(StoreError::IllegalArguments("empty key".into()));
        }
        if kv.key.len() > MAX_KEY_LEN {
            return Err(StoreError::IllegalArguments(format!(
                "key length {} exceeds {MAX_KEY_LEN}",
                kv.key.len()
            )));
        }
        if kv.value.len() > MAX_VALUE_LEN {
            return Err(StoreError::IllegalArguments(format!(
                "value length {} exceeds {MAX_VALUE_LEN}",
                kv.value.len()
            )));
        }
        if !seen.insert(kv.key.as_slice()) {
            return Err(StoreError::IllegalArguments(format!(
                "duplicate key in transaction: {}",
                String::from_utf8_lossy(&kv.key)
            )));
        }
    }
    Ok(())
}
