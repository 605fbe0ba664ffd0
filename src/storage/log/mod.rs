//! Append-only transaction log
//!
//! The log is the source of truth. Every commit is one framed record in a
//! segment file, fsynced before it is acknowledged. The log owns the TxID
//! counter and the accumulated hash chain.
//!
//! Key properties:
//! - Single writer (one mutex around the active segment)
//! - TxIDs strictly increasing from 1, no gaps
//! - Records are never rewritten; only a torn tail is truncated on open
//! - Commit notifications are published on a `watch` channel

mod format;
mod recovery;
mod snapshot;
mod tx;
mod writer;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::error::{StoreError, StoreResult};
use crate::merkle::{self, Hash, ALH_SEED};
use crate::proof::{ChainState, DualProof, InclusionProof};
use crate::storage::snapshot::SnapshotRegistry;
use crate::traits::TxSource;

pub use format::{
    LogRecord, RecordHeader, RecordRead, RecordTrailer, LOG_MAGIC, LOG_VERSION, MIN_RECORD_LEN,
};
pub use recovery::{LogRecovery, RecoveredLog};
pub use snapshot::LogSnapshot;
pub use tx::{
    validate_entries, CommitResult, Kv, Tx, TxMetadata, MAX_KEY_LEN, MAX_TX_ENTRIES,
    MAX_VALUE_LEN,
};
pub use writer::{segment_path, RecordLocation, SegmentWriter};

/// Options for opening a [`TransactionLog`]
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directory holding the segment files
    pub dir: PathBuf,

    /// Segment size that triggers rollover
    pub max_segment_size: u64,

    /// Enable fsync (disable only for testing)
    pub fsync_enabled: bool,
}

impl LogOptions {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_segment_size: 64 * 1024 * 1024,
            fsync_enabled: true,
        }
    }
}

/// In-memory header of a committed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeader {
    pub metadata: TxMetadata,
    pub alh: Hash,
    pub location: RecordLocation,
}

/// Durable, hash-chained transaction log
pub struct TransactionLog {
    dir: PathBuf,

    /// Active segment; holding this lock is what makes a caller the writer
    writer: Mutex<SegmentWriter>,

    /// Header of every committed transaction, index = TxID - 1
    headers: RwLock<Vec<TxHeader>>,

    /// Latest (TxID, Alh), readable without locking
    head: ArcSwap<ChainState>,

    /// Committed head notifications for the indexer
    committed: watch::Sender<u64>,

    snapshots: SnapshotRegistry,
}

impl TransactionLog {
    /// Open the log, recovering and verifying all existing segments
    ///
    /// # Errors
    ///
    /// Returns `Corruption`/`Unsupported` from recovery, or `Io` if the
    /// active segment cannot be opened
    pub fn open(options: LogOptions) -> StoreResult<Self> {
        let recovered = LogRecovery::new(options.dir.clone()).scan()?;
        let head = ChainState {
            tx_id: recovered.headers.len() as u64,
            alh: recovered.head_alh(),
        };

        let writer = SegmentWriter::open(
            options.dir.clone(),
            recovered.active_segment,
            recovered.active_len,
            options.max_segment_size,
            options.fsync_enabled,
        )?;
        let (committed, _) = watch::channel(head.tx_id);

        tracing::info!(
            dir = %options.dir.display(),
            tx_id = head.tx_id,
            segment = recovered.active_segment,
            "Transaction log opened"
        );

        Ok(Self {
            dir: options.dir,
            writer: Mutex::new(writer),
            headers: RwLock::new(recovered.headers),
            head: ArcSwap::from_pointee(head),
            committed,
            snapshots: SnapshotRegistry::new(),
        })
    }

    /// Durably append a transaction
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `IllegalArguments` for an empty batch, empty/oversized keys or a
    ///   key repeated within the batch
    /// - `Io` if the record could not be written and synced; nothing is
    ///   acknowledged in that case
    pub fn commit(&self, entries: Vec<Kv>) -> StoreResult<CommitResult> {
        validate_entries(&entries)?;

        let leaves: Vec<Hash> = entries.iter().map(Kv::leaf_hash).collect();
        let eh = merkle::compute_root(&leaves);

        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let prev = **self.head.load();

        let metadata = TxMetadata {
            id: prev.tx_id + 1,
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            entry_count: entries.len() as u32,
            eh,
        };
        let alh = metadata.next_alh(&prev.alh);
        let record = format::encode_record(&metadata, &alh, &entries)?;
        let location = writer.append(&record)?;

        // Publish: header table first, then the head, then the notification
        self.headers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(TxHeader {
                metadata,
                alh,
                location,
            });
        self.head.store(Arc::new(ChainState {
            tx_id: metadata.id,
            alh,
        }));
        self.committed.send_replace(metadata.id);
        drop(writer);

        tracing::debug!(
            tx_id = metadata.id,
            entries = metadata.entry_count,
            segment = location.segment_id,
            "Committed transaction"
        );

        Ok(CommitResult {
            tx_id: metadata.id,
            eh,
            alh,
        })
    }

    /// Read a committed transaction
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `tx_id` is 0 or above the head, `Corruption` if
    /// the stored record no longer matches its header
    pub fn read_tx(&self, tx_id: u64) -> StoreResult<Tx> {
        let (header, prev_alh) = self.header_with_prev(tx_id)?;
        let record = self.load_record(&header)?;
        Ok(Tx {
            metadata: record.metadata,
            alh: record.alh,
            prev_alh,
            entries: record.entries,
        })
    }

    /// Value of `key` inside `tx`
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the transaction does not contain `key`
    pub fn read_value(&self, tx: &Tx, key: &[u8]) -> StoreResult<Vec<u8>> {
        tx.value(key).map(<[u8]>::to_vec)
    }

    /// Metadata of a committed transaction
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `tx_id` is 0 or above the head
    pub fn metadata(&self, tx_id: u64) -> StoreResult<TxMetadata> {
        self.header_with_prev(tx_id).map(|(h, _)| h.metadata)
    }

    /// Alh after `tx_id`; `tx_id == 0` is the seed
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `tx_id` is above the head
    pub fn alh_at(&self, tx_id: u64) -> StoreResult<Hash> {
        if tx_id == 0 {
            return Ok(ALH_SEED);
        }
        self.header_with_prev(tx_id).map(|(h, _)| h.alh)
    }

    /// Current head (TxID, Alh)
    #[must_use]
    pub fn alh(&self) -> ChainState {
        **self.head.load()
    }

    /// Number of committed transactions
    #[must_use]
    pub fn tx_count(&self) -> u64 {
        self.head.load().tx_id
    }

    /// Inclusion proof of `key` in transaction `tx_id`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown transaction, `KeyNotFound` if the
    /// transaction does not contain `key`
    pub fn proof(&self, tx_id: u64, key: &[u8]) -> StoreResult<InclusionProof> {
        self.read_tx(tx_id)?.proof(key)
    }

    /// Consistency proof between two chain states, in either order
    ///
    /// The proof always runs from the smaller TxID to the larger one.
    /// `dual_proof(a, a)` is the identity proof and either side may be 0.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either TxID is above the head
    pub fn dual_proof(&self, a: u64, b: u64) -> StoreResult<DualProof> {
        self.dual_proof_within(a, b, self.tx_count())
    }

    pub(crate) fn dual_proof_within(&self, a: u64, b: u64, bound: u64) -> StoreResult<DualProof> {
        let (source, target) = if a <= b { (a, b) } else { (b, a) };

        let headers = self.headers.read().unwrap_or_else(|p| p.into_inner());
        let head = bound.min(headers.len() as u64);
        if target > head {
            return Err(StoreError::NotFound {
                tx_id: target,
                head,
            });
        }

        let alh_of = |tx_id: u64| {
            if tx_id == 0 {
                ALH_SEED
            } else {
                headers[(tx_id - 1) as usize].alh
            }
        };

        Ok(DualProof {
            source_tx_id: source,
            source_alh: alh_of(source),
            target_tx_id: target,
            target_alh: alh_of(target),
            metadata: headers[source as usize..target as usize]
                .iter()
                .map(|h| h.metadata)
                .collect(),
        })
    }

    /// Point-in-time view pinned at the current head
    pub fn snapshot(&self) -> LogSnapshot<'_> {
        let state = self.alh();
        LogSnapshot::new(self, state, self.snapshots.pin(state.tx_id))
    }

    /// Number of live log snapshots
    #[must_use]
    pub fn active_snapshots(&self) -> usize {
        self.snapshots.active()
    }

    /// Subscribe to committed-head notifications
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.committed.subscribe()
    }

    /// Whether the writer still accepts commits
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self
            .writer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_broken()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn header_with_prev(&self, tx_id: u64) -> StoreResult<(TxHeader, Hash)> {
        let headers = self.headers.read().unwrap_or_else(|p| p.into_inner());
        let head = headers.len() as u64;
        if tx_id == 0 || tx_id > head {
            return Err(StoreError::NotFound { tx_id, head });
        }
        let idx = (tx_id - 1) as usize;
        let prev_alh = if idx == 0 {
            ALH_SEED
        } else {
            headers[idx - 1].alh
        };
        Ok((headers[idx], prev_alh))
    }

    fn load_record(&self, header: &TxHeader) -> StoreResult<LogRecord> {
        let loc = header.location;
        let mut file = File::open(segment_path(&self.dir, loc.segment_id))?;
        file.seek(SeekFrom::Start(loc.offset))?;
        let mut buf = vec![0u8; loc.len as usize];
        file.read_exact(&mut buf)?;

        let read = format::read_record(&mut buf.as_slice())
            .map_err(|e| StoreError::Corruption(format!("tx {}: {e}", header.metadata.id)))?;
        match read {
            RecordRead::Valid(record)
                if record.metadata == header.metadata && record.alh == header.alh =>
            {
                Ok(record)
            }
            _ => Err(StoreError::Corruption(format!(
                "tx {} at segment {} offset {} no longer matches its header",
                header.metadata.id, loc.segment_id, loc.offset
            ))),
        }
    }
}

impl TxSource for TransactionLog {
    fn committed_tx_id(&self) -> u64 {
        self.tx_count()
    }

    fn read_tx(&self, tx_id: u64) -> StoreResult<Tx> {
        TransactionLog::read_tx(self, tx_id)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        TransactionLog::subscribe(self)
    }
}
