//! Versioned tree nodes and their binary encoding
//!
//! Nodes are immutable once published. A leaf holds keys with their most
//! recent TxIDs; an inner node holds children tagged with the smallest key
//! reachable through them. Older TxIDs of a key are moved out of the leaf
//! into a chain of history chunks, so rewriting a leaf costs the same no
//! matter how often its keys were written.

use std::io;

/// Stable handle of a node in the arena
pub type NodeId = u64;

/// TxIDs a leaf entry keeps inline before they move to a history chunk
pub const HISTORY_CHUNK_LEN: usize = 16;

const NO_NODE: NodeId = u64::MAX;

/// A key and the TxIDs it was written at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,

    /// Newest TxIDs, ascending, never more than [`HISTORY_CHUNK_LEN`]
    pub recent: Vec<u64>,

    /// Newest chunk of older TxIDs
    pub older: Option<NodeId>,

    /// Total number of versions, chunked ones included
    pub versions: u64,
}

impl LeafEntry {
    #[must_use]
    pub fn new(key: &[u8], tx_id: u64) -> Self {
        Self {
            key: key.to_vec(),
            recent: vec![tx_id],
            older: None,
            versions: 1,
        }
    }

    /// Most recent TxID
    #[must_use]
    pub fn latest(&self) -> u64 {
        self.recent.last().copied().unwrap_or_default()
    }

    /// Move the inline TxIDs out once they fill a chunk
    ///
    /// The caller stores the returned chunk and points `older` at it.
    pub fn take_full_chunk(&mut self) -> Option<HistoryChunk> {
        if self.recent.len() < HISTORY_CHUNK_LEN {
            return None;
        }
        Some(HistoryChunk {
            tx_ids: std::mem::take(&mut self.recent),
            prev: self.older,
        })
    }
}

/// Older TxIDs of one key (ascending), linked to the chunk before them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryChunk {
    pub tx_ids: Vec<u64>,
    pub prev: Option<NodeId>,
}

/// Child reference in an inner node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    /// Smallest key in the child's subtree
    pub min_key: Vec<u8>,
    pub id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Sorted, non-empty entries
    Leaf(Vec<LeafEntry>),
    /// Sorted, non-empty children
    Inner(Vec<ChildRef>),
    /// Not part of the tree; reached only through a leaf entry
    History(HistoryChunk),
}

const TAG_LEAF: u8 = 0;
const TAG_INNER: u8 = 1;
const TAG_HISTORY: u8 = 2;

impl Node {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(entries) => entries.len(),
            Self::Inner(children) => children.len(),
            Self::History(chunk) => chunk.tx_ids.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key in the subtree rooted here
    #[must_use]
    pub fn min_key(&self) -> &[u8] {
        match self {
            Self::Leaf(entries) => entries.first().map_or(&[][..], |e| e.key.as_slice()),
            Self::Inner(children) => children.first().map_or(&[][..], |c| c.min_key.as_slice()),
            Self::History(_) => &[],
        }
    }

    /// Split a tree node into two halves of the same kind
    ///
    /// History chunks are never split and yield `None`.
    #[must_use]
    pub fn split(self) -> Option<(Node, Node)> {
        match self {
            Self::Leaf(mut entries) => {
                let right = entries.split_off(entries.len() / 2);
                Some((Self::Leaf(entries), Self::Leaf(right)))
            }
            Self::Inner(mut children) => {
                let right = children.split_off(children.len() / 2);
                Some((Self::Inner(children), Self::Inner(right)))
            }
            Self::History(_) => None,
        }
    }

    /// Encode as:
    /// - tag (1 byte)
    /// - count (4 bytes, big-endian)
    /// - leaf entry: key_len u32, key, versions u64, older chunk id u64
    ///   (`u64::MAX` = none), recent_len u32, tx ids u64...
    /// - inner child: key_len u32, key, node id u64
    /// - history chunk: tx ids u64..., previous chunk id u64
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Leaf(entries) => {
                buf.push(TAG_LEAF);
                buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
                for entry in entries {
                    put_bytes(&mut buf, &entry.key);
                    buf.extend_from_slice(&entry.versions.to_be_bytes());
                    buf.extend_from_slice(&entry.older.unwrap_or(NO_NODE).to_be_bytes());
                    put_tx_ids(&mut buf, &entry.recent);
                }
            }
            Self::Inner(children) => {
                buf.push(TAG_INNER);
                buf.extend_from_slice(&(children.len() as u32).to_be_bytes());
                for child in children {
                    put_bytes(&mut buf, &child.min_key);
                    buf.extend_from_slice(&child.id.to_be_bytes());
                }
            }
            Self::History(chunk) => {
                buf.push(TAG_HISTORY);
                put_tx_ids(&mut buf, &chunk.tx_ids);
                buf.extend_from_slice(&chunk.prev.unwrap_or(NO_NODE).to_be_bytes());
            }
        }
        buf
    }

    /// Decode a node produced by [`encode`](Self::encode)
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the buffer is malformed or has trailing bytes
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor { buf };
        let tag = cursor.u8()?;
        let count = cursor.u32()? as usize;

        let node = match tag {
            TAG_LEAF => {
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = cursor.bytes()?;
                    let versions = cursor.u64()?;
                    let older = cursor.node_id()?;
                    let recent_len = cursor.u32()? as usize;
                    let recent = cursor.tx_ids(recent_len)?;
                    entries.push(LeafEntry {
                        key,
                        recent,
                        older,
                        versions,
                    });
                }
                Self::Leaf(entries)
            }
            TAG_INNER => {
                let mut children = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let min_key = cursor.bytes()?;
                    let id = cursor.u64()?;
                    children.push(ChildRef { min_key, id });
                }
                Self::Inner(children)
            }
            TAG_HISTORY => {
                let tx_ids = cursor.tx_ids(count)?;
                let prev = cursor.node_id()?;
                Self::History(HistoryChunk { tx_ids, prev })
            }
            other => return Err(invalid(format!("unknown node tag {other}"))),
        };

        if !cursor.buf.is_empty() {
            return Err(invalid("trailing bytes after node".into()));
        }
        Ok(node)
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn put_tx_ids(buf: &mut Vec<u8>, tx_ids: &[u64]) {
    buf.extend_from_slice(&(tx_ids.len() as u32).to_be_bytes());
    for tx_id in tx_ids {
        buf.extend_from_slice(&tx_id.to_be_bytes());
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.buf.len() < n {
            return Err(invalid("node record is truncated".into()));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> io::Result<u32> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(out))
    }

    fn u64(&mut self) -> io::Result<u64> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(out))
    }

    fn bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn node_id(&mut self) -> io::Result<Option<NodeId>> {
        let id = self.u64()?;
        Ok((id != NO_NODE).then_some(id))
    }

    fn tx_ids(&mut self, count: usize) -> io::Result<Vec<u64>> {
        let mut tx_ids = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            tx_ids.push(self.u64()?);
        }
        Ok(tx_ids)
    }
}
