//! Ordered key iteration over an index snapshot

use std::ops::Bound;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};

use super::cow::misplaced_history;
use super::node::{Node, NodeId};
use super::store::NodeArena;

/// What a [`Reader`] iterates over
///
/// Ascending readers start at `max(prefix, start_key)` when `match_prefix` is
/// set, otherwise at `start_key` (or `prefix` when no start key is given).
/// Descending readers start at the first key not greater than `start_key`,
/// capped to the end of the prefix range when `match_prefix` is set.
/// With `match_prefix` iteration stops at the first key lacking the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSpec {
    pub prefix: Vec<u8>,
    pub match_prefix: bool,
    pub ascending: bool,
    pub start_key: Option<Vec<u8>>,
}

impl Default for ReaderSpec {
    fn default() -> Self {
        Self {
            prefix: Vec::new(),
            match_prefix: false,
            ascending: true,
            start_key: None,
        }
    }
}

impl ReaderSpec {
    /// All keys carrying `prefix`, ascending
    pub fn with_prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            match_prefix: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    #[must_use]
    pub fn start_at(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.start_key = Some(key.into());
        self
    }

    fn ascending_seek(&self) -> &[u8] {
        match &self.start_key {
            Some(start) if !self.match_prefix || *start > self.prefix => start,
            _ => &self.prefix,
        }
    }

    fn descending_bound(&self) -> Bound<Vec<u8>> {
        if !self.match_prefix {
            return match &self.start_key {
                Some(start) => Bound::Included(start.clone()),
                None if self.prefix.is_empty() => Bound::Unbounded,
                None => Bound::Included(self.prefix.clone()),
            };
        }
        match (&self.start_key, prefix_successor(&self.prefix)) {
            (Some(start), Some(end)) if *start >= end => Bound::Excluded(end),
            (Some(start), _) => Bound::Included(start.clone()),
            (None, Some(end)) => Bound::Excluded(end),
            (None, None) => Bound::Unbounded,
        }
    }
}

/// Smallest key greater than every key carrying `prefix`, if one exists
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

struct Frame {
    node: Arc<Node>,
    /// Ascending: index of the next leaf entry / current child.
    /// Descending: leaf entries remaining / current child.
    pos: usize,
}

/// Lazy cursor yielding `(key, latest tx_id)` pairs
///
/// [`read`](Self::read) returns `KeyNotFound` once the sequence is exhausted.
/// A reader is not restartable; build a new one from the snapshot instead.
pub struct Reader<'s> {
    arena: &'s NodeArena,
    spec: ReaderSpec,
    stack: Vec<Frame>,
    done: bool,
}

impl<'s> Reader<'s> {
    pub(crate) fn new(
        arena: &'s NodeArena,
        root: Option<NodeId>,
        spec: ReaderSpec,
    ) -> StoreResult<Self> {
        let mut reader = Self {
            arena,
            spec,
            stack: Vec::new(),
            done: false,
        };
        match root {
            Some(root) if reader.spec.ascending => reader.seek_ascending(root)?,
            Some(root) => reader.seek_descending(root)?,
            None => reader.done = true,
        }
        Ok(reader)
    }

    /// Next `(key, tx_id)`
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` at end of sequence, or `Corruption` for a
    /// dangling node reference
    pub fn read(&mut self) -> StoreResult<(Vec<u8>, u64)> {
        if self.done {
            return Err(StoreError::KeyNotFound);
        }
        let next = if self.spec.ascending {
            self.next_ascending()?
        } else {
            self.next_descending()?
        };

        match next {
            Some((key, tx_id)) if !self.spec.match_prefix || key.starts_with(&self.spec.prefix) => {
                Ok((key, tx_id))
            }
            _ => {
                self.done = true;
                self.stack.clear();
                Err(StoreError::KeyNotFound)
            }
        }
    }

    fn seek_ascending(&mut self, root: NodeId) -> StoreResult<()> {
        let seek = self.spec.ascending_seek().to_vec();
        let mut id = root;
        loop {
            let node = self.arena.get(id)?;
            match &*node {
                Node::Inner(children) => {
                    let pos = children
                        .partition_point(|c| c.min_key <= seek)
                        .saturating_sub(1);
                    let child = child_at(children, pos)?;
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        pos,
                    });
                    id = child;
                }
                Node::Leaf(entries) => {
                    let pos = entries.partition_point(|e| e.key < seek);
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        pos,
                    });
                    return Ok(());
                }
                Node::History(_) => return Err(misplaced_history(id)),
            }
        }
    }

    fn seek_descending(&mut self, root: NodeId) -> StoreResult<()> {
        let bound = self.spec.descending_bound();
        let within = |key: &[u8]| match &bound {
            Bound::Unbounded => true,
            Bound::Included(b) => key <= b.as_slice(),
            Bound::Excluded(b) => key < b.as_slice(),
        };

        let mut id = root;
        loop {
            let node = self.arena.get(id)?;
            match &*node {
                Node::Inner(children) => {
                    let count = children.partition_point(|c| within(c.min_key.as_slice()));
                    if count == 0 {
                        // Every key sorts after the bound
                        self.stack.clear();
                        self.done = true;
                        return Ok(());
                    }
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        pos: count - 1,
                    });
                    id = children[count - 1].id;
                }
                Node::Leaf(entries) => {
                    let pos = entries.partition_point(|e| within(e.key.as_slice()));
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        pos,
                    });
                    return Ok(());
                }
                Node::History(_) => return Err(misplaced_history(id)),
            }
        }
    }

    fn next_ascending(&mut self) -> StoreResult<Option<(Vec<u8>, u64)>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let next_child = match &*frame.node {
                Node::Leaf(entries) => {
                    if let Some(entry) = entries.get(frame.pos) {
                        frame.pos += 1;
                        return Ok(Some((entry.key.clone(), entry.latest())));
                    }
                    None
                }
                Node::Inner(children) => {
                    frame.pos += 1;
                    children.get(frame.pos).map(|c| c.id)
                }
                Node::History(_) => None,
            };
            match next_child {
                Some(id) => self.descend(id, true)?,
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    fn next_descending(&mut self) -> StoreResult<Option<(Vec<u8>, u64)>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let next_child = match &*frame.node {
                Node::Leaf(entries) => {
                    if frame.pos > 0 {
                        frame.pos -= 1;
                        let entry = &entries[frame.pos];
                        return Ok(Some((entry.key.clone(), entry.latest())));
                    }
                    None
                }
                Node::Inner(children) => {
                    if frame.pos > 0 {
                        frame.pos -= 1;
                        Some(children[frame.pos].id)
                    } else {
                        None
                    }
                }
                Node::History(_) => None,
            };
            match next_child {
                Some(id) => self.descend(id, false)?,
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    /// Push the path to the first (or last) leaf under `id`
    fn descend(&mut self, mut id: NodeId, first: bool) -> StoreResult<()> {
        loop {
            let node = self.arena.get(id)?;
            match &*node {
                Node::Inner(children) => {
                    let pos = if first { 0 } else { children.len().saturating_sub(1) };
                    let child = child_at(children, pos)?;
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        pos,
                    });
                    id = child;
                }
                Node::Leaf(entries) => {
                    let pos = if first { 0 } else { entries.len() };
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        pos,
                    });
                    return Ok(());
                }
                Node::History(_) => return Err(misplaced_history(id)),
            }
        }
    }
}

fn child_at(children: &[super::node::ChildRef], pos: usize) -> StoreResult<NodeId> {
    children
        .get(pos)
        .map(|c| c.id)
        .ok_or_else(|| StoreError::Corruption("empty inner node".into()))
}

impl Iterator for Reader<'_> {
    type Item = StoreResult<(Vec<u8>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read() {
            Ok(item) => Some(Ok(item)),
            Err(StoreError::KeyNotFound) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_successor(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_successor(b"\xff\xff"), None);
        assert_eq!(prefix_successor(b""), None);
    }

    #[test]
    fn test_seek_positions() {
        let spec = ReaderSpec::with_prefix("user:").start_at("user:m");
        assert_eq!(spec.ascending_seek(), b"user:m");

        let spec = ReaderSpec::with_prefix("user:").start_at("a");
        assert_eq!(spec.ascending_seek(), b"user:");

        let spec = ReaderSpec::with_prefix("user:").descending();
        assert_eq!(spec.descending_bound(), Bound::Excluded(b"user;".to_vec()));

        let spec = ReaderSpec::with_prefix("user:").descending().start_at("zzz");
        assert_eq!(spec.descending_bound(), Bound::Excluded(b"user;".to_vec()));

        let spec = ReaderSpec::default().descending();
        assert_eq!(spec.descending_bound(), Bound::Unbounded);
    }
}
