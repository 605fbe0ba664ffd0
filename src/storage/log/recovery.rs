//! Transaction log recovery after crashes
//!
//! Implements the recovery decision tree:
//! - Scan segments in ID order; IDs must be contiguous
//! - Re-verify every record: CRCs, TxID sequence, Merkle root, Alh chain
//! - A damaged record at the tail of the last segment is a torn write and is
//!   truncated; damage anywhere else is corruption
//! - A record only counts as the tail if it reaches the end of the file: a
//!   bad body whose extent runs past it, or a bad header with too few bytes
//!   left for any complete record

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::merkle::{self, Hash, ALH_SEED};

use super::format::{self, LogRecord, RecordRead, MIN_RECORD_LEN};
use super::writer::{parse_segment_id, RecordLocation};
use super::TxHeader;

/// Log state reconstructed from disk
#[derive(Debug, Clone)]
pub struct RecoveredLog {
    /// Headers of every committed transaction, in TxID order
    pub headers: Vec<TxHeader>,

    /// Segment that receives the next append
    pub active_segment: u32,

    /// Verified length of the active segment
    pub active_len: u64,

    /// Bytes cut from a torn tail (0 after a clean shutdown)
    pub truncated_bytes: u64,
}

impl RecoveredLog {
    /// Alh of the last recovered transaction
    #[must_use]
    pub fn head_alh(&self) -> Hash {
        self.headers.last().map_or(ALH_SEED, |h| h.alh)
    }
}

/// Recovers log state on open
pub struct LogRecovery {
    dir: PathBuf,
}

impl LogRecovery {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Scan and verify all segments
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `Corruption` for a missing segment, a TxID gap, a root or Alh
    ///   mismatch, or a damaged record outside the tail of the last segment
    /// - `Unsupported` for a record written by an unknown format version
    /// - `Io` if a segment cannot be read or truncated
    pub fn scan(&self) -> StoreResult<RecoveredLog> {
        fs::create_dir_all(&self.dir)?;
        let segments = self.collect_segments()?;

        let Some(&(last_id, _)) = segments.last() else {
            return Ok(RecoveredLog {
                headers: Vec::new(),
                active_segment: 1,
                active_len: 0,
                truncated_bytes: 0,
            });
        };

        for pair in segments.windows(2) {
            if pair[1].0 != pair[0].0 + 1 {
                return Err(StoreError::Corruption(format!(
                    "missing log segment between {} and {}",
                    pair[0].0, pair[1].0
                )));
            }
        }

        let mut scan = SegmentScan {
            headers: Vec::new(),
            prev_alh: ALH_SEED,
            truncated_bytes: 0,
        };
        let mut active_len = 0;
        for (segment_id, path) in &segments {
            let end = scan.segment(*segment_id, path, *segment_id == last_id)?;
            if *segment_id == last_id {
                active_len = end;
            }
        }

        tracing::info!(
            segments = segments.len(),
            tx_count = scan.headers.len(),
            truncated_bytes = scan.truncated_bytes,
            "Transaction log recovered"
        );

        Ok(RecoveredLog {
            headers: scan.headers,
            active_segment: last_id,
            active_len,
            truncated_bytes: scan.truncated_bytes,
        })
    }

    /// Collect all segment files, sorted by ID
    fn collect_segments(&self) -> io::Result<Vec<(u32, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(id) = parse_segment_id(&name.to_string_lossy()) {
                files.push((id, entry.path()));
            }
        }
        files.sort_by_key(|(id, _)| *id);
        Ok(files)
    }
}

struct SegmentScan {
    headers: Vec<TxHeader>,
    prev_alh: Hash,
    truncated_bytes: u64,
}

impl SegmentScan {
    /// Verify one segment, returning its valid length
    fn segment(&mut self, segment_id: u32, path: &Path, is_last: bool) -> StoreResult<u64> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;

        while offset < file_len {
            let read = format::read_record(&mut reader).map_err(|e| match e.kind() {
                io::ErrorKind::Unsupported => {
                    StoreError::Unsupported(format!("segment {segment_id} offset {offset}: {e}"))
                }
                _ => StoreError::Io(e),
            })?;

            let reason = match read {
                RecordRead::Valid(record) => {
                    let len = record.len;
                    self.accept(record, segment_id, offset)?;
                    offset += len;
                    continue;
                }
                RecordRead::BadHeader if is_last && file_len - offset < MIN_RECORD_LEN => None,
                RecordRead::BadHeader => Some("unreadable record header".to_string()),
                RecordRead::BadBody { record_len, .. } if is_last && offset + record_len >= file_len => {
                    None
                }
                RecordRead::BadBody { reason, .. } => Some(reason),
            };

            if let Some(reason) = reason {
                return Err(StoreError::Corruption(format!(
                    "segment {segment_id} offset {offset}: {reason}"
                )));
            }

            self.truncate(segment_id, path, offset, file_len)?;
            return Ok(offset);
        }

        Ok(offset)
    }

    /// Check a CRC-valid record against the chain rebuilt so far
    fn accept(&mut self, record: LogRecord, segment_id: u32, offset: u64) -> StoreResult<()> {
        let expected = self.headers.len() as u64 + 1;
        let tx_id = record.metadata.id;
        if tx_id != expected {
            return Err(StoreError::Corruption(format!(
                "segment {segment_id} offset {offset}: expected tx {expected}, found tx {tx_id}"
            )));
        }

        let leaves: Vec<Hash> = record.entries.iter().map(|kv| kv.leaf_hash()).collect();
        if merkle::compute_root(&leaves) != record.metadata.eh {
            return Err(StoreError::Corruption(format!(
                "tx {tx_id}: Merkle root does not match entries"
            )));
        }

        let alh = record.metadata.next_alh(&self.prev_alh);
        if alh != record.alh {
            return Err(StoreError::Corruption(format!(
                "tx {tx_id}: accumulated hash does not extend tx {}",
                tx_id - 1
            )));
        }

        self.prev_alh = alh;
        self.headers.push(TxHeader {
            metadata: record.metadata,
            alh,
            location: RecordLocation {
                segment_id,
                offset,
                len: record.len,
            },
        });
        Ok(())
    }

    fn truncate(&mut self, segment_id: u32, path: &Path, offset: u64, file_len: u64) -> StoreResult<()> {
        let dropped = file_len - offset;
        tracing::warn!(
            segment = segment_id,
            offset,
            dropped_bytes = dropped,
            "Truncating torn tail of last log segment"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset)?;
        file.sync_all()?;
        self.truncated_bytes += dropped;
        Ok(())
    }
}
