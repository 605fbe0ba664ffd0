//! Segment writer
//!
//! Appends encoded records to the active segment with fsync guarantees and
//! rolls over to a new segment once the size limit would be exceeded.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Position of a record inside the segment set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub segment_id: u32,
    pub offset: u64,
    pub len: u64,
}

/// Segment file path: `{dir}/segment_{id:08}.txl`
#[must_use]
pub fn segment_path(dir: &Path, segment_id: u32) -> PathBuf {
    dir.join(format!("segment_{segment_id:08}.txl"))
}

/// Parse a segment ID out of a file name produced by [`segment_path`]
#[must_use]
pub fn parse_segment_id(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("segment_")?
        .strip_suffix(".txl")?
        .parse()
        .ok()
}

/// Writes records to the active segment
///
/// # File Naming
///
/// - Segments: `log/segment_{segment_id:08}.txl`, numbered from 1
pub struct SegmentWriter {
    dir: PathBuf,
    segment_id: u32,
    file: File,
    len: u64,
    max_segment_size: u64,
    fsync_enabled: bool,

    /// Set when a failed append could not be rolled back
    broken: bool,
}

impl SegmentWriter {
    /// Open the active segment for appending at `len`
    ///
    /// `len` is the verified end of the segment as established by recovery.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the directory or file cannot be opened
    pub fn open(
        dir: PathBuf,
        segment_id: u32,
        len: u64,
        max_segment_size: u64,
        fsync_enabled: bool,
    ) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let file = Self::open_segment(&dir, segment_id)?;

        Ok(Self {
            dir,
            segment_id,
            file,
            len,
            max_segment_size,
            fsync_enabled,
            broken: false,
        })
    }

    fn open_segment(dir: &Path, segment_id: u32) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(segment_path(dir, segment_id))
    }

    /// Append one encoded record and make it durable
    ///
    /// After this returns `Ok` the record survives a crash (when fsync is
    /// enabled). On failure the partial record is cut off again; if that
    /// also fails the writer refuses all further appends.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if:
    /// - The writer was broken by an earlier failure
    /// - Segment rollover fails
    /// - Write or fsync fails
    pub fn append(&mut self, record: &[u8]) -> io::Result<RecordLocation> {
        if self.broken {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "segment writer is unusable after a failed rollback",
            ));
        }

        let record_len = record.len() as u64;
        if self.len > 0 && self.len + record_len > self.max_segment_size {
            self.roll_over()?;
        }

        let offset = self.len;
        if let Err(e) = self.write_at(offset, record) {
            tracing::error!(
                segment = self.segment_id,
                offset,
                error = %e,
                "Segment append failed, rolling back partial record"
            );
            if let Err(rollback) = self.file.set_len(offset) {
                tracing::error!(
                    segment = self.segment_id,
                    error = %rollback,
                    "Rollback failed, refusing further commits"
                );
                self.broken = true;
            }
            return Err(e);
        }

        self.len += record_len;
        Ok(RecordLocation {
            segment_id: self.segment_id,
            offset,
            len: record_len,
        })
    }

    fn write_at(&mut self, offset: u64, record: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(record)?;
        self.file.flush()?;
        if self.fsync_enabled {
            // CRITICAL: fsync before acknowledging
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Seal the active segment and start the next one
    fn roll_over(&mut self) -> io::Result<()> {
        if self.fsync_enabled {
            self.file.sync_all()?;
        }
        let next_id = self.segment_id + 1;
        let file = Self::open_segment(&self.dir, next_id)?;
        file.set_len(0)?;
        if self.fsync_enabled {
            sync_dir(&self.dir)?;
        }

        tracing::debug!(
            sealed = self.segment_id,
            segment = next_id,
            sealed_len = self.len,
            "Rolled over to new segment"
        );

        self.segment_id = next_id;
        self.file = file;
        self.len = 0;
        Ok(())
    }

    #[must_use]
    pub fn segment_id(&self) -> u32 {
        self.segment_id
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

/// fsync a directory so that newly created files are durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
