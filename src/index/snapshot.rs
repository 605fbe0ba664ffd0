//! Point-in-time views of the versioned index

use crate::error::{StoreError, StoreResult};
use crate::storage::snapshot::SnapshotGuard;

use super::cow::misplaced_history;
use super::node::{LeafEntry, Node};
use super::reader::{Reader, ReaderSpec};
use super::store::{IndexRoot, NodeArena};

/// Read-only view bound to one published root
///
/// Later inserts publish new roots and never affect this view. Call
/// [`release`](Self::release) when done; dropping it has the same effect.
pub struct IndexSnapshot<'a> {
    arena: &'a NodeArena,
    root: IndexRoot,
    _guard: SnapshotGuard<'a>,
}

impl<'a> IndexSnapshot<'a> {
    pub(super) fn new(arena: &'a NodeArena, root: IndexRoot, guard: SnapshotGuard<'a>) -> Self {
        Self {
            arena,
            root,
            _guard: guard,
        }
    }

    #[must_use]
    pub fn root(&self) -> IndexRoot {
        self.root
    }

    /// Watermark the snapshot reflects
    #[must_use]
    pub fn indexed_tx(&self) -> u64 {
        self.root.indexed_tx
    }

    /// Latest TxID that wrote `key`
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if `key` was never indexed under this root
    pub fn get(&self, key: &[u8]) -> StoreResult<u64> {
        self.entry(key).map(|e| e.latest())
    }

    /// Up to `limit` TxIDs that wrote `key`, newest first
    ///
    /// # Errors
    ///
    /// Returns `IllegalArguments` for `limit == 0`, `KeyNotFound` if `key`
    /// was never indexed under this root
    pub fn get_ts(&self, key: &[u8], limit: usize) -> StoreResult<Vec<u64>> {
        if limit == 0 {
            return Err(StoreError::IllegalArguments(
                "limit must be greater than zero".into(),
            ));
        }
        let entry = self.entry(key)?;
        let mut tx_ids: Vec<u64> = entry.recent.iter().rev().take(limit).copied().collect();

        // Walk the history chunks, newest first
        let mut next = entry.older;
        while tx_ids.len() < limit {
            let Some(id) = next else { break };
            let node = self.arena.get(id)?;
            let Node::History(chunk) = &*node else {
                return Err(StoreError::Corruption(format!(
                    "index node {id} is not a history chunk"
                )));
            };
            let wanted = limit - tx_ids.len();
            tx_ids.extend(chunk.tx_ids.iter().rev().take(wanted));
            next = chunk.prev;
        }
        Ok(tx_ids)
    }

    /// Number of versions of `key`
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if `key` was never indexed under this root
    pub fn version_count(&self, key: &[u8]) -> StoreResult<u64> {
        self.entry(key).map(|e| e.versions)
    }

    /// Lazy ordered iteration
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the seek path hits a dangling node
    pub fn reader(&self, spec: ReaderSpec) -> StoreResult<Reader<'_>> {
        Reader::new(self.arena, self.root.root, spec)
    }

    /// Number of distinct keys carrying `prefix`
    ///
    /// # Errors
    ///
    /// Returns `Corruption` for a dangling node reference
    pub fn count(&self, prefix: &[u8]) -> StoreResult<u64> {
        let mut count = 0;
        for item in self.reader(ReaderSpec::with_prefix(prefix))? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Release the snapshot
    pub fn release(self) {}

    fn entry(&self, key: &[u8]) -> StoreResult<LeafEntry> {
        let Some(mut id) = self.root.root else {
            return Err(StoreError::KeyNotFound);
        };
        loop {
            let node = self.arena.get(id)?;
            match &*node {
                Node::Inner(children) => {
                    let count = children.partition_point(|c| c.min_key.as_slice() <= key);
                    if count == 0 {
                        return Err(StoreError::KeyNotFound);
                    }
                    id = children[count - 1].id;
                }
                Node::Leaf(entries) => {
                    return entries
                        .binary_search_by(|e| e.key.as_slice().cmp(key))
                        .map(|pos| entries[pos].clone())
                        .map_err(|_| StoreError::KeyNotFound);
                }
                Node::History(_) => return Err(misplaced_history(id)),
            }
        }
    }
}
