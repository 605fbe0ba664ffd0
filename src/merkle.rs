//! Hashing conventions for transaction trees and the accumulated hash chain
//!
//! Every transaction commits to its entries through an RFC 6962 Merkle Tree
//! Hash (SHA-256, domain-separated leaves and nodes):
//!
//! - `leaf_hash(key, value) = SHA-256(0x00 || u32_be(len(key)) || key || value)`
//! - `node_hash(l, r) = SHA-256(0x01 || l || r)`
//! - for `n > 1` leaves the tree splits at the largest power of two below `n`,
//!   so an odd trailing subtree is promoted unchanged rather than padded.
//!
//! Transactions are then chained: `Alh[0] = ALH_SEED` and
//! `Alh[n] = SHA-256(Alh[n-1] || u64_be(tx_id) || i64_be(timestamp) || u32_be(entry_count) || eh)`.

use sha2::{Digest, Sha256};

/// SHA-256 digest
pub type Hash = [u8; 32];

/// Leaf domain separator
pub const LEAF_PREFIX: u8 = 0x00;

/// Internal node domain separator
pub const NODE_PREFIX: u8 = 0x01;

/// Accumulated hash before the first transaction
pub const ALH_SEED: Hash = [0u8; 32];

/// Hash a single key/value entry as a Merkle leaf
#[must_use]
pub fn leaf_hash(key: &[u8], value: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update((key.len() as u32).to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize().into()
}

/// Hash two child hashes into their parent
#[must_use]
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root of a tree without leaves
#[must_use]
pub fn empty_root() -> Hash {
    Sha256::digest([]).into()
}

/// Merkle Tree Hash over ordered leaf hashes
#[must_use]
pub fn compute_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => empty_root(),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            node_hash(&compute_root(&leaves[..k]), &compute_root(&leaves[k..]))
        }
    }
}

/// Audit path for the leaf at `index`, ordered from the leaf towards the root
///
/// Returns `None` if `index` is outside the tree.
#[must_use]
pub fn inclusion_path(leaves: &[Hash], index: usize) -> Option<Vec<Hash>> {
    if index >= leaves.len() {
        return None;
    }
    let mut path = Vec::new();
    collect_path(leaves, index, &mut path);
    Some(path)
}

fn collect_path(leaves: &[Hash], index: usize, path: &mut Vec<Hash>) {
    let n = leaves.len();
    if n <= 1 {
        return;
    }
    let k = split_point(n);
    if index < k {
        collect_path(&leaves[..k], index, path);
        path.push(compute_root(&leaves[k..]));
    } else {
        collect_path(&leaves[k..], index - k, path);
        path.push(compute_root(&leaves[..k]));
    }
}

/// Recompute a root from a leaf hash and its audit path (RFC 9162 2.1.3.2)
///
/// Returns `None` when the path length does not fit `(leaf_index, tree_size)`.
#[must_use]
pub fn root_from_path(
    leaf: &Hash,
    leaf_index: u64,
    tree_size: u64,
    path: &[Hash],
) -> Option<Hash> {
    if leaf_index >= tree_size {
        return None;
    }

    let mut fnode = leaf_index;
    let mut snode = tree_size - 1;
    let mut root = *leaf;

    for sibling in path {
        if snode == 0 {
            return None;
        }
        if fnode & 1 == 1 || fnode == snode {
            root = node_hash(sibling, &root);
            while fnode & 1 == 0 && fnode != 0 {
                fnode >>= 1;
                snode >>= 1;
            }
        } else {
            root = node_hash(&root, sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    (snode == 0).then_some(root)
}

/// Next link of the accumulated hash chain
#[must_use]
pub fn chain_alh(prev: &Hash, tx_id: u64, timestamp: i64, entry_count: u32, eh: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(tx_id.to_be_bytes());
    hasher.update(timestamp.to_be_bytes());
    hasher.update(entry_count.to_be_bytes());
    hasher.update(eh);
    hasher.finalize().into()
}

/// Largest power of two strictly below `n` (`n >= 2`)
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

/// Serde adapter encoding a [`Hash`] as lowercase hex
pub mod hash_hex {
    use super::Hash;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected a 32-byte hash"))
    }
}

/// Serde adapter encoding a list of [`Hash`] values as lowercase hex strings
pub mod hash_hex_vec {
    use super::Hash;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hashes: &[Hash], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(hashes.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Hash>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| {
                let bytes = hex::decode(s).map_err(D::Error::custom)?;
                bytes
                    .try_into()
                    .map_err(|_| D::Error::custom("expected a 32-byte hash"))
            })
            .collect()
    }
}
