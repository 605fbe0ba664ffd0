//! Copy-on-write insertion
//!
//! A [`WriteBatch`] collects every node created while applying one
//! transaction. Published nodes are never touched: each insert copies the
//! root-to-leaf path into the batch. Nodes already created by the same batch
//! are unpublished and get updated in place.
//!
//! A leaf entry keeps at most
//! [`HISTORY_CHUNK_LEN`](super::node::HISTORY_CHUNK_LEN) TxIDs inline. When it is
//! full, the inline TxIDs become a new history chunk in the same batch and
//! the entry starts over, so an update writes a bounded number of bytes.

use crate::error::{StoreError, StoreResult};

use super::node::{ChildRef, LeafEntry, Node, NodeId};
use super::store::NodeArena;

pub(crate) struct WriteBatch<'a> {
    arena: &'a NodeArena,
    max_entries: usize,

    /// First ID handed out by this batch
    base: NodeId,

    /// New nodes; `pending[i]` gets ID `base + i`
    pending: Vec<Node>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(arena: &'a NodeArena, max_entries: usize) -> Self {
        Self {
            arena,
            max_entries,
            base: arena.len(),
            pending: Vec::new(),
        }
    }

    pub(crate) fn base(&self) -> NodeId {
        self.base
    }

    pub(crate) fn into_pending(self) -> Vec<Node> {
        self.pending
    }

    /// Record `tx_id` for `key` under `root`, returning the new root
    pub(crate) fn insert(
        &mut self,
        root: Option<NodeId>,
        key: &[u8],
        tx_id: u64,
    ) -> StoreResult<NodeId> {
        if key.is_empty() {
            return Err(StoreError::IllegalArguments("empty key".into()));
        }

        let Some(root) = root else {
            return Ok(self.put(None, Node::Leaf(vec![LeafEntry::new(key, tx_id)])));
        };

        let mut refs = self.insert_at(root, key, tx_id)?;
        if refs.len() == 1 {
            return Ok(refs.remove(0).id);
        }
        // Root split: grow the tree by one level
        Ok(self.put(None, Node::Inner(refs)))
    }

    /// Insert below `id`; returns one ref, or two if the node split
    fn insert_at(&mut self, id: NodeId, key: &[u8], tx_id: u64) -> StoreResult<Vec<ChildRef>> {
        let mut node = self.node(id)?;

        match &mut node {
            Node::Leaf(entries) => {
                match entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
                    Ok(pos) => {
                        let latest = entries[pos].latest();
                        if tx_id < latest {
                            return Err(StoreError::IllegalArguments(format!(
                                "tx {tx_id} is older than tx {latest} already indexed for key"
                            )));
                        }
                        if tx_id == latest {
                            return Ok(vec![ChildRef {
                                min_key: entries[0].key.clone(),
                                id,
                            }]);
                        }
                        let entry = &mut entries[pos];
                        if let Some(chunk) = entry.take_full_chunk() {
                            entry.older = Some(self.put(None, Node::History(chunk)));
                        }
                        entry.recent.push(tx_id);
                        entry.versions += 1;
                    }
                    Err(pos) => entries.insert(pos, LeafEntry::new(key, tx_id)),
                }
            }
            Node::Inner(children) => {
                let idx = children
                    .partition_point(|c| c.min_key.as_slice() <= key)
                    .saturating_sub(1);
                let replacement = self.insert_at(children[idx].id, key, tx_id)?;
                children.splice(idx..=idx, replacement);
            }
            Node::History(_) => return Err(misplaced_history(id)),
        }

        self.store(id, node)
    }

    /// Store a modified copy of `id`, splitting it if it overflowed
    fn store(&mut self, id: NodeId, node: Node) -> StoreResult<Vec<ChildRef>> {
        if node.len() <= self.max_entries {
            let min_key = node.min_key().to_vec();
            let id = self.put(Some(id), node);
            return Ok(vec![ChildRef { min_key, id }]);
        }

        let Some((left, right)) = node.split() else {
            return Err(misplaced_history(id));
        };
        let left_min = left.min_key().to_vec();
        let right_min = right.min_key().to_vec();
        let left_id = self.put(Some(id), left);
        let right_id = self.put(None, right);
        Ok(vec![
            ChildRef {
                min_key: left_min,
                id: left_id,
            },
            ChildRef {
                min_key: right_min,
                id: right_id,
            },
        ])
    }

    /// Owned copy of a node, from this batch or the arena
    fn node(&self, id: NodeId) -> StoreResult<Node> {
        if id >= self.base {
            return self
                .pending
                .get((id - self.base) as usize)
                .cloned()
                .ok_or_else(|| StoreError::Corruption(format!("dangling node reference {id}")));
        }
        Ok((*self.arena.get(id)?).clone())
    }

    /// Place a node, reusing `reuse` if this batch created it
    fn put(&mut self, reuse: Option<NodeId>, node: Node) -> NodeId {
        if let Some(id) = reuse.filter(|id| *id >= self.base) {
            self.pending[(id - self.base) as usize] = node;
            return id;
        }
        self.pending.push(node);
        self.base + self.pending.len() as u64 - 1
    }
}

/// A history chunk found where the tree expects a leaf or inner node
pub(crate) fn misplaced_history(id: NodeId) -> StoreError {
    StoreError::Corruption(format!("index node {id} is a history chunk inside the tree"))
}
