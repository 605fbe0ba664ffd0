// File: src/storage/engine/mod.rs

//! Store facade
//!
//! Wires the transaction log, the versioned index and the indexer together
//! and exposes the key-value operations on top of them. Writes go straight
//! to the log. Index-backed reads first wait for the watermark to reach the
//! TxID they need, resolve the key through an index snapshot, then fetch the
//! value from the log.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::background::{BackgroundJobRunner, Watermark};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::index::{IndexSnapshot, ReaderSpec, VersionedIndex};
use crate::proof::{ChainState, DualProof, InclusionProof, ProofEngine, SafeItem};
use crate::storage::log::{
    CommitResult, Kv, LogSnapshot, TransactionLog, Tx, LOG_VERSION,
};
use crate::storage::recovery::{self, RecoveryReport};
use crate::traits::TxSource;

/// A value together with the transaction that wrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub tx_id: u64,
}

/// Store liveness summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// False once the writer is broken or the indexer halted
    pub healthy: bool,
    pub tx_count: u64,
    pub indexed_tx: u64,
    /// On-disk log format version
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

/// Embedded tamper-evident key-value store
pub struct Store {
    config: Config,
    log: Arc<TransactionLog>,
    index: Arc<VersionedIndex>,
    runner: BackgroundJobRunner,
    watermark: Watermark,
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Cancels every wait in flight when the store shuts down
    cancel: CancellationToken,

    recovery: RecoveryReport,
}

impl Store {
    /// Open the store and start the indexer
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if:
    /// - The configuration is invalid
    /// - Log or index recovery finds corruption or an unknown format
    /// - Directory or file creation fails
    pub async fn open(config: Config) -> StoreResult<Self> {
        config.validate()?;

        let log = Arc::new(TransactionLog::open(config.storage.log_options())?);
        let index = Arc::new(VersionedIndex::open(
            config.storage.index_dir(),
            config.index.clone(),
            config.storage.fsync_enabled,
        )?);
        let report = recovery::reconcile(&log, &index)?;

        let runner = BackgroundJobRunner::new(
            Arc::clone(&log) as Arc<dyn TxSource>,
            Arc::clone(&index),
            config.background.clone(),
        );
        let watermark = runner.watermark();
        let handles = runner.start().await?;

        tracing::info!(
            data_dir = %config.storage.data_dir.display(),
            tx_count = log.tx_count(),
            indexed_tx = index.indexed_tx(),
            "Store opened"
        );

        Ok(Self {
            config,
            log,
            index,
            runner,
            watermark,
            handles: Mutex::new(handles),
            cancel: CancellationToken::new(),
            recovery: report,
        })
    }

    // ========== Writes ==========

    /// Durably commit a batch of entries as one transaction
    ///
    /// # Errors
    ///
    /// Returns `IllegalArguments` for a malformed batch or `Io` if the
    /// transaction could not be made durable
    pub fn commit(&self, entries: Vec<Kv>) -> StoreResult<CommitResult> {
        self.log.commit(entries)
    }

    /// # Errors
    ///
    /// See [`commit`](Self::commit)
    pub fn set(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> StoreResult<CommitResult> {
        self.commit(vec![Kv::new(key, value)])
    }

    /// # Errors
    ///
    /// See [`commit`](Self::commit)
    pub fn set_batch(&self, entries: Vec<Kv>) -> StoreResult<CommitResult> {
        self.commit(entries)
    }

    // ========== Log reads ==========

    /// # Errors
    ///
    /// Returns `NotFound` outside `[1, tx_count]`
    pub fn read_tx(&self, tx_id: u64) -> StoreResult<Tx> {
        self.log.read_tx(tx_id)
    }

    /// # Errors
    ///
    /// Returns `KeyNotFound` if `tx` does not contain `key`
    pub fn read_value(&self, tx: &Tx, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.log.read_value(tx, key)
    }

    /// Transaction by TxID
    ///
    /// # Errors
    ///
    /// Returns `NotFound` outside `[1, tx_count]`
    pub fn by_index(&self, tx_id: u64) -> StoreResult<Tx> {
        self.read_tx(tx_id)
    }

    /// Log view pinned at the current head
    pub fn snapshot(&self) -> LogSnapshot<'_> {
        self.log.snapshot()
    }

    /// Index view pinned at the current root
    pub fn index_snapshot(&self) -> IndexSnapshot<'_> {
        self.index.snapshot()
    }

    /// Current head (TxID, Alh)
    #[must_use]
    pub fn alh(&self) -> ChainState {
        self.log.alh()
    }

    /// Current head, the state clients should trust after verifying it
    #[must_use]
    pub fn current_root(&self) -> ChainState {
        self.alh()
    }

    /// Highest TxID reflected in the index
    #[must_use]
    pub fn index_info(&self) -> u64 {
        self.watermark.indexed_tx()
    }

    #[must_use]
    pub fn tx_count(&self) -> u64 {
        self.log.tx_count()
    }

    // ========== Proofs ==========

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown transaction or `KeyNotFound`
    pub fn proof(&self, tx_id: u64, key: &[u8]) -> StoreResult<InclusionProof> {
        ProofEngine::new(&self.log).inclusion(tx_id, key)
    }

    /// # Errors
    ///
    /// Returns `NotFound` if either TxID is above the head
    pub fn dual_proof(&self, a: u64, b: u64) -> StoreResult<DualProof> {
        ProofEngine::new(&self.log).dual(a, b)
    }

    /// Proof that the current head extends the state at `tx_id`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `tx_id` is above the head
    pub fn consistency(&self, tx_id: u64) -> StoreResult<DualProof> {
        self.dual_proof(tx_id, self.tx_count())
    }

    /// Read `key` with a certificate relative to `trusted`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `trusted` is beyond the head, `KeyNotFound`, or
    /// any error from waiting on the indexer
    pub async fn safe_get(&self, key: &[u8], trusted: ChainState) -> StoreResult<SafeItem> {
        if key.is_empty() {
            return Err(StoreError::IllegalArguments("empty key".into()));
        }
        let head = self.tx_count();
        if trusted.tx_id > head {
            return Err(StoreError::NotFound {
                tx_id: trusted.tx_id,
                head,
            });
        }
        self.wait_indexed(trusted.tx_id).await?;

        let snapshot = self.index.snapshot();
        let item = ProofEngine::new(&self.log).safe_read(&snapshot, key, trusted);
        snapshot.release();
        item
    }

    /// Write `key` and return a certificate for the new transaction
    ///
    /// # Errors
    ///
    /// Returns any commit error, or `NotFound` if `trusted` is beyond the
    /// new head
    pub fn safe_set(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        trusted: ChainState,
    ) -> StoreResult<SafeItem> {
        let key = key.into();
        let committed = self.set(key.clone(), value)?;
        let tx = self.log.read_tx(committed.tx_id)?;
        ProofEngine::new(&self.log).certify(&tx, &key, trusted)
    }

    // ========== Index reads ==========

    /// Wait until the watermark reaches `target`
    ///
    /// # Errors
    ///
    /// Returns `Timeout`, `Cancelled` or `IndexingHalted`
    pub async fn wait_for_indexing(
        &self,
        target: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        self.watermark.wait_for(target, timeout, cancel).await
    }

    /// Wait with the configured timeout, cancelled on shutdown
    async fn wait_indexed(&self, target: u64) -> StoreResult<u64> {
        self.watermark
            .wait_for(
                target,
                self.config.background.indexer.wait_timeout(),
                &self.cancel,
            )
            .await
    }

    /// Latest value of `key` as currently indexed
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the index has no entry for `key`
    pub async fn get(&self, key: &[u8]) -> StoreResult<Item> {
        self.get_since(key, 0).await
    }

    /// Latest value of `key` once everything up to `tx_id` is indexed
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound`, or `Timeout`/`Cancelled`/`IndexingHalted` from
    /// the wait
    pub async fn get_since(&self, key: &[u8], tx_id: u64) -> StoreResult<Item> {
        if key.is_empty() {
            return Err(StoreError::IllegalArguments("empty key".into()));
        }
        self.wait_indexed(tx_id).await?;

        let snapshot = self.index.snapshot();
        let found = snapshot.get(key);
        snapshot.release();
        self.item_at(key, found?)
    }

    /// Items for every present key; absent keys are skipped
    ///
    /// # Errors
    ///
    /// Any error other than `KeyNotFound` aborts the batch
    pub async fn get_batch(&self, keys: &[Vec<u8>]) -> StoreResult<Vec<Item>> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(key).await {
                Ok(item) => items.push(item),
                Err(StoreError::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    /// Versions of `key`, newest first (oldest first with `reverse`)
    ///
    /// `limit == 0` returns every version after `offset`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if `key` was never indexed
    pub fn history(
        &self,
        key: &[u8],
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> StoreResult<Vec<Item>> {
        let fetch = if limit == 0 {
            usize::MAX
        } else {
            offset.saturating_add(limit)
        };
        let snapshot = self.index.snapshot();
        let tx_ids = snapshot.get_ts(key, fetch)?;
        drop(snapshot);

        let mut items = tx_ids
            .into_iter()
            .skip(offset)
            .map(|tx_id| self.item_at(key, tx_id))
            .collect::<StoreResult<Vec<_>>>()?;
        if reverse {
            items.reverse();
        }
        Ok(items)
    }

    /// Latest values of keys carrying `prefix`
    ///
    /// `limit == 0` means no limit.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` for a damaged index or any log read error
    pub fn scan(&self, prefix: &[u8], ascending: bool, limit: usize) -> StoreResult<Vec<Item>> {
        let mut spec = ReaderSpec::with_prefix(prefix);
        spec.ascending = ascending;
        let limit = if limit == 0 { usize::MAX } else { limit };

        let snapshot = self.index.snapshot();
        let mut items = Vec::new();
        for entry in snapshot.reader(spec)?.take(limit) {
            let (key, tx_id) = entry?;
            items.push(self.item_at(&key, tx_id)?);
        }
        Ok(items)
    }

    /// Number of distinct indexed keys carrying `prefix`
    ///
    /// # Errors
    ///
    /// Returns `Corruption` for a damaged index
    pub fn count(&self, prefix: &[u8]) -> StoreResult<u64> {
        self.index.snapshot().count(prefix)
    }

    fn item_at(&self, key: &[u8], tx_id: u64) -> StoreResult<Item> {
        let tx = self.log.read_tx(tx_id)?;
        let value = self.log.read_value(&tx, key)?;
        Ok(Item {
            key: key.to_vec(),
            value,
            tx_id,
        })
    }

    // ========== Lifecycle ==========

    #[must_use]
    pub fn health(&self) -> Health {
        let halted = self.watermark.halted();
        Health {
            healthy: halted.is_none() && self.log.is_writable(),
            tx_count: self.tx_count(),
            indexed_tx: self.index_info(),
            version: LOG_VERSION.to_string(),
            halted,
        }
    }

    /// What startup reconciliation found
    #[must_use]
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the indexer and wait for it to exit
    ///
    /// Waits in flight fail with `Cancelled`. Committed data stays durable;
    /// the index resumes from its persisted watermark on the next open.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.runner.shutdown();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background job panicked");
            }
        }
        tracing::info!(
            tx_count = self.tx_count(),
            indexed_tx = self.index.indexed_tx(),
            "Store shut down"
        );
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.runner.shutdown();
    }
}
