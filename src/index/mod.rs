//! Persistent copy-on-write versioned index
//!
//! Maps each key to the ascending list of TxIDs that wrote it. Nodes are
//! immutable once published and live in a [`NodeArena`]; an insert copies
//! the root-to-leaf path and publishes a new [`IndexRoot`] through `ArcSwap`.
//! Readers load a root and never wait for the writer.
//!
//! Only the indexer writes. Each transaction is applied as one batch: its
//! nodes and a commit frame are appended to `nodes.idx` before the root is
//! published, so a reopened index resumes at the last durable watermark.

pub mod config;
mod cow;
pub mod node;
pub mod reader;
pub mod snapshot;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::error::{StoreError, StoreResult};
use crate::storage::snapshot::SnapshotRegistry;

pub use config::IndexConfig;
pub use node::NodeId;
pub use reader::{Reader, ReaderSpec};
pub use snapshot::IndexSnapshot;
pub use store::{IndexRoot, NodeArena, NodeFile};

use cow::WriteBatch;

/// Node file name inside the index directory
pub const INDEX_FILE: &str = "nodes.idx";

/// Versioned index over the transaction log
pub struct VersionedIndex {
    dir: PathBuf,
    arena: NodeArena,

    /// Node file; holding this lock is what makes a caller the writer
    file: Mutex<NodeFile>,

    /// Latest published root
    current: ArcSwap<IndexRoot>,

    config: IndexConfig,
    snapshots: SnapshotRegistry,
}

impl VersionedIndex {
    /// Open the index, loading every committed node
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration, `Corruption` or
    /// `Unsupported` for a damaged node file, `Io` on filesystem errors
    pub fn open(
        dir: impl Into<PathBuf>,
        config: IndexConfig,
        fsync_enabled: bool,
    ) -> StoreResult<Self> {
        config.validate()?;
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let loaded = NodeFile::load(&dir.join(INDEX_FILE), fsync_enabled)?;
        let arena = NodeArena::default();
        let node_count = loaded.nodes.len();
        arena.extend(0, loaded.nodes)?;

        tracing::info!(
            dir = %dir.display(),
            indexed_tx = loaded.root.indexed_tx,
            nodes = node_count,
            "Versioned index opened"
        );

        Ok(Self {
            dir,
            arena,
            file: Mutex::new(loaded.file),
            current: ArcSwap::from_pointee(loaded.root),
            config,
            snapshots: SnapshotRegistry::new(),
        })
    }

    /// Record `tx_id` for a single key
    ///
    /// Publishes a new root without moving the watermark.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArguments` for an empty key or a TxID lower than the
    /// key's latest one, `Io` if the nodes cannot be persisted
    pub fn insert(&self, key: &[u8], tx_id: u64) -> StoreResult<IndexRoot> {
        self.write(tx_id, [key], false)
    }

    /// Index every key of transaction `tx_id` and advance the watermark
    ///
    /// The batch is durable before the new root is published.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArguments` if `tx_id` does not directly follow the
    /// current watermark or a key is empty, `Io` if the batch cannot be
    /// persisted (nothing is published in that case)
    pub fn apply_tx<I, K>(&self, tx_id: u64, keys: I) -> StoreResult<IndexRoot>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        self.write(tx_id, keys, true)
    }

    fn write<I, K>(&self, tx_id: u64, keys: I, advance: bool) -> StoreResult<IndexRoot>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        let current = **self.current.load();

        if advance && tx_id != current.indexed_tx + 1 {
            return Err(StoreError::IllegalArguments(format!(
                "tx {tx_id} does not follow indexed tx {}",
                current.indexed_tx
            )));
        }

        let mut batch = WriteBatch::new(&self.arena, self.config.max_node_entries);
        let mut root = current.root;
        for key in keys {
            root = Some(batch.insert(root, key.as_ref(), tx_id)?);
        }

        let next = IndexRoot {
            root,
            indexed_tx: if advance { tx_id } else { current.indexed_tx },
        };
        let base = batch.base();
        let nodes = batch.into_pending();
        let created = nodes.len();

        file.append(base, &nodes, &next)?;
        self.arena.extend(base, nodes)?;
        self.current.store(Arc::new(next));
        drop(file);

        tracing::debug!(
            tx_id,
            indexed_tx = next.indexed_tx,
            nodes = created,
            "Index root published"
        );
        Ok(next)
    }

    /// Drop every node and start over from an empty tree
    ///
    /// Only valid while no snapshot is alive.
    pub(crate) fn reset(&self) -> StoreResult<()> {
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.reset()?;
        self.arena.clear();
        self.current.store(Arc::new(IndexRoot::default()));
        tracing::warn!(dir = %self.dir.display(), "Versioned index reset");
        Ok(())
    }

    /// Latest published root
    #[must_use]
    pub fn root(&self) -> IndexRoot {
        **self.current.load()
    }

    /// Highest TxID whose keys are all indexed
    #[must_use]
    pub fn indexed_tx(&self) -> u64 {
        self.current.load().indexed_tx
    }

    /// View pinned at the current root
    pub fn snapshot(&self) -> IndexSnapshot<'_> {
        let root = self.root();
        IndexSnapshot::new(&self.arena, root, self.snapshots.pin(root.indexed_tx))
    }

    /// Latest TxID for `key` under the current root
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if `key` was never indexed
    pub fn get(&self, key: &[u8]) -> StoreResult<u64> {
        self.snapshot().get(key)
    }

    /// Up to `limit` TxIDs for `key`, newest first
    ///
    /// # Errors
    ///
    /// Returns `IllegalArguments` for `limit == 0`, `KeyNotFound` if `key`
    /// was never indexed
    pub fn get_ts(&self, key: &[u8], limit: usize) -> StoreResult<Vec<u64>> {
        self.snapshot().get_ts(key, limit)
    }

    #[must_use]
    pub fn node_count(&self) -> u64 {
        self.arena.len()
    }

    #[must_use]
    pub fn active_snapshots(&self) -> usize {
        self.snapshots.active()
    }

    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests;
