//! Node arena and its append-only backing file
//!
//! File layout (`index/nodes.idx`):
//! - File header (5 bytes): magic "CKVI", version
//! - Frames: kind (1 byte), payload_len (4 bytes), payload, crc32 (4 bytes)
//!   - node frame payload: node id (8 bytes) + encoded node
//!   - commit frame payload: root id (8 bytes, `u64::MAX` = empty),
//!     indexed tx (8 bytes), node count (8 bytes)
//!
//! Nodes written after the last commit frame are not part of any published
//! root and are dropped on open.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};

use super::node::{Node, NodeId};

/// Index file magic bytes "CKVI"
pub const INDEX_MAGIC: [u8; 4] = *b"CKVI";

/// Current index file format version
pub const INDEX_VERSION: u8 = 1;

const FILE_HEADER_SIZE: u64 = 5;
const FRAME_NODE: u8 = 1;
const FRAME_COMMIT: u8 = 2;
const NO_ROOT: u64 = u64::MAX;

const CRC_ISCSI: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// A published tree version: root handle plus the watermark it reflects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexRoot {
    /// Root node, `None` for the empty tree
    pub root: Option<NodeId>,

    /// Highest TxID whose keys are all reflected under `root`
    pub indexed_tx: u64,
}

/// Immutable nodes addressed by `NodeId`
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: RwLock<Vec<Arc<Node>>>,
}

impl NodeArena {
    /// Fetch a published node
    ///
    /// # Errors
    ///
    /// Returns `Corruption` for an ID that was never published
    pub fn get(&self, id: NodeId) -> StoreResult<Arc<Node>> {
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes
            .get(id as usize)
            .cloned()
            .ok_or_else(|| StoreError::Corruption(format!("dangling node reference {id}")))
    }

    /// Number of published nodes (also the next free `NodeId`)
    #[must_use]
    pub fn len(&self) -> u64 {
        self.nodes.read().unwrap_or_else(|p| p.into_inner()).len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish nodes whose IDs continue the arena
    pub(crate) fn extend(&self, base: NodeId, nodes: Vec<Node>) -> StoreResult<()> {
        let mut arena = self.nodes.write().unwrap_or_else(|p| p.into_inner());
        if arena.len() as u64 != base {
            return Err(StoreError::Corruption(format!(
                "node batch starts at {base} but arena holds {}",
                arena.len()
            )));
        }
        arena.extend(nodes.into_iter().map(Arc::new));
        Ok(())
    }

    pub(crate) fn clear(&self) {
        self.nodes.write().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

/// Append-only node file
pub struct NodeFile {
    path: PathBuf,
    file: File,
    len: u64,
    fsync_enabled: bool,
}

/// Contents of the node file up to its last commit frame
pub struct LoadedNodes {
    pub file: NodeFile,
    pub nodes: Vec<Node>,
    pub root: IndexRoot,
}

impl NodeFile {
    /// Open (or create) the node file and load every committed node
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for an unknown version, `Corruption` for a bad
    /// magic or non-contiguous node IDs, and `Io` on read/truncate failures
    pub fn load(path: &Path, fsync_enabled: bool) -> StoreResult<LoadedNodes> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let mut node_file = Self {
            path: path.to_path_buf(),
            file,
            len: file_len,
            fsync_enabled,
        };

        if file_len < FILE_HEADER_SIZE {
            node_file.reset()?;
            return Ok(LoadedNodes {
                file: node_file,
                nodes: Vec::new(),
                root: IndexRoot::default(),
            });
        }

        let mut reader = BufReader::new(node_file.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; FILE_HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;
        if header[..4] != INDEX_MAGIC {
            return Err(StoreError::Corruption(format!(
                "{} is not an index file",
                path.display()
            )));
        }
        if header[4] != INDEX_VERSION {
            return Err(StoreError::Unsupported(format!(
                "index format version {}",
                header[4]
            )));
        }

        let mut nodes: Vec<Node> = Vec::new();
        let mut staged: Vec<Node> = Vec::new();
        let mut root = IndexRoot::default();
        let mut offset = FILE_HEADER_SIZE;
        let mut committed_offset = FILE_HEADER_SIZE;

        while offset < file_len {
            let Some((kind, payload)) = read_frame(&mut reader, file_len - offset)? else {
                break;
            };
            offset += frame_len(payload.len());

            match kind {
                FRAME_NODE => {
                    let (id, node) = decode_node_payload(&payload)?;
                    let expected = (nodes.len() + staged.len()) as u64;
                    if id != expected {
                        return Err(StoreError::Corruption(format!(
                            "index node {id} found where {expected} was expected"
                        )));
                    }
                    staged.push(node);
                }
                FRAME_COMMIT => {
                    let (commit_root, node_count) = decode_commit_payload(&payload)?;
                    nodes.append(&mut staged);
                    if node_count != nodes.len() as u64 {
                        return Err(StoreError::Corruption(format!(
                            "index commit for tx {} expects {node_count} nodes, found {}",
                            commit_root.indexed_tx,
                            nodes.len()
                        )));
                    }
                    root = commit_root;
                    committed_offset = offset;
                }
                other => {
                    return Err(StoreError::Corruption(format!(
                        "unknown index frame kind {other}"
                    )))
                }
            }
        }

        if committed_offset < file_len {
            tracing::warn!(
                path = %path.display(),
                offset = committed_offset,
                dropped_bytes = file_len - committed_offset,
                "Truncating uncommitted index tail"
            );
            node_file.file.set_len(committed_offset)?;
            node_file.file.sync_all()?;
            node_file.len = committed_offset;
        }

        Ok(LoadedNodes {
            file: node_file,
            nodes,
            root,
        })
    }

    /// Append a batch of nodes followed by its commit frame, durably
    ///
    /// On failure the file is cut back to its previous length.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the write, the fsync or the rollback fails
    pub fn append(&mut self, base: NodeId, nodes: &[Node], root: &IndexRoot) -> StoreResult<()> {
        let mut buf = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            let mut payload = (base + i as u64).to_be_bytes().to_vec();
            payload.extend_from_slice(&node.encode());
            put_frame(&mut buf, FRAME_NODE, &payload)?;
        }
        let mut commit = Vec::with_capacity(24);
        commit.extend_from_slice(&root.root.unwrap_or(NO_ROOT).to_be_bytes());
        commit.extend_from_slice(&root.indexed_tx.to_be_bytes());
        commit.extend_from_slice(&(base + nodes.len() as u64).to_be_bytes());
        put_frame(&mut buf, FRAME_COMMIT, &commit)?;

        let offset = self.len;
        if let Err(e) = self.write_at(offset, &buf) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Index append failed, rolling back"
            );
            self.file.set_len(offset)?;
            return Err(e.into());
        }
        self.len += buf.len() as u64;
        Ok(())
    }

    /// Drop every node and start an empty file
    ///
    /// # Errors
    ///
    /// Returns `Io` if truncation or the header write fails
    pub fn reset(&mut self) -> StoreResult<()> {
        self.file.set_len(0)?;
        let mut header = INDEX_MAGIC.to_vec();
        header.push(INDEX_VERSION);
        self.write_at(0, &header)?;
        self.len = FILE_HEADER_SIZE;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        if self.fsync_enabled {
            self.file.sync_data()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len <= FILE_HEADER_SIZE
    }
}

fn frame_len(payload_len: usize) -> u64 {
    1 + 4 + payload_len as u64 + 4
}

fn put_frame(buf: &mut Vec<u8>, kind: u8, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "index node too large"))?;
    let start = buf.len();
    buf.push(kind);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    let crc = CRC_ISCSI.checksum(&buf[start..]);
    buf.extend_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Read one frame; `None` if it is short or fails its CRC
fn read_frame<R: Read>(reader: &mut R, remaining: u64) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut head = [0u8; 5];
    match reader.read_exact(&mut head) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let payload_len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
    if frame_len(payload_len) > remaining {
        return Ok(None);
    }

    let mut payload = vec![0u8; payload_len];
    let mut crc_bytes = [0u8; 4];
    match reader
        .read_exact(&mut payload)
        .and_then(|()| reader.read_exact(&mut crc_bytes))
    {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut digest = CRC_ISCSI.digest();
    digest.update(&head);
    digest.update(&payload);
    if digest.finalize() != u32::from_be_bytes(crc_bytes) {
        return Ok(None);
    }
    Ok(Some((head[0], payload)))
}

fn decode_node_payload(payload: &[u8]) -> StoreResult<(NodeId, Node)> {
    if payload.len() < 8 {
        return Err(StoreError::Corruption("index node frame too short".into()));
    }
    let (id_bytes, body) = payload.split_at(8);
    let mut id = [0u8; 8];
    id.copy_from_slice(id_bytes);
    let id = u64::from_be_bytes(id);
    let node = Node::decode(body)
        .map_err(|e| StoreError::Corruption(format!("index node {id}: {e}")))?;
    Ok((id, node))
}

fn decode_commit_payload(payload: &[u8]) -> StoreResult<(IndexRoot, u64)> {
    if payload.len() != 24 {
        return Err(StoreError::Corruption("malformed index commit frame".into()));
    }
    let field = |i: usize| {
        let mut out = [0u8; 8];
        out.copy_from_slice(&payload[i * 8..(i + 1) * 8]);
        u64::from_be_bytes(out)
    };
    let root = match field(0) {
        NO_ROOT => None,
        id => Some(id),
    };
    Ok((
        IndexRoot {
            root,
            indexed_tx: field(1),
        },
        field(2),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::node::LeafEntry;
    use tempfile::tempdir;

    fn leaf(key: &str, tx: u64) -> Node {
        Node::Leaf(vec![LeafEntry::new(key.as_bytes(), tx)])
    }

    #[test]
    fn test_new_file_is_empty() {
        let dir = tempdir().unwrap();
        let loaded = NodeFile::load(&dir.path().join("nodes.idx"), false).unwrap();
        assert!(loaded.nodes.is_empty());
        assert_eq!(loaded.root, IndexRoot::default());
        assert!(loaded.file.is_empty());
    }

    #[test]
    fn test_committed_batches_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.idx");
        {
            let mut loaded = NodeFile::load(&path, false).unwrap();
            let first = IndexRoot {
                root: Some(0),
                indexed_tx: 1,
            };
            loaded.file.append(0, &[leaf("a", 1)], &first).unwrap();
            let second = IndexRoot {
                root: Some(2),
                indexed_tx: 2,
            };
            loaded
                .file
                .append(1, &[leaf("b", 2), leaf("a", 1)], &second)
                .unwrap();
        }

        let loaded = NodeFile::load(&path, false).unwrap();
        assert_eq!(loaded.nodes.len(), 3);
        assert_eq!(
            loaded.root,
            IndexRoot {
                root: Some(2),
                indexed_tx: 2
            }
        );
    }

    #[test]
    fn test_uncommitted_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.idx");
        let committed_len = {
            let mut loaded = NodeFile::load(&path, false).unwrap();
            let root = IndexRoot {
                root: Some(0),
                indexed_tx: 1,
            };
            loaded.file.append(0, &[leaf("a", 1)], &root).unwrap();
            loaded.file.len()
        };

        // A node frame without its commit frame, then a torn frame
        let mut tail = Vec::new();
        let mut payload = 1u64.to_be_bytes().to_vec();
        payload.extend_from_slice(&leaf("b", 2).encode());
        put_frame(&mut tail, FRAME_NODE, &payload).unwrap();
        tail.extend_from_slice(&[FRAME_COMMIT, 0, 0]);
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&tail)
            .unwrap();

        let loaded = NodeFile::load(&path, false).unwrap();
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.root.indexed_tx, 1);
        assert_eq!(loaded.file.len(), committed_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed_len);
    }

    #[test]
    fn test_unknown_version_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.idx");
        let mut header = INDEX_MAGIC.to_vec();
        header.push(42);
        std::fs::write(&path, header).unwrap();

        assert!(matches!(
            NodeFile::load(&path, false),
            Err(StoreError::Unsupported(_))
        ));
    }

    #[test]
    fn test_arena_rejects_gaps() {
        let arena = NodeArena::default();
        arena.extend(0, vec![leaf("a", 1)]).unwrap();
        assert!(arena.extend(5, vec![leaf("b", 2)]).is_err());
        assert_eq!(arena.len(), 1);
        assert!(arena.get(0).is_ok());
        assert!(matches!(arena.get(1), Err(StoreError::Corruption(_))));
    }
}
