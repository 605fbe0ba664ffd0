//! Transaction record format
//!
//! Each committed transaction is one self-delimiting record in a segment file:
//! - Header (33 bytes): magic, version, transaction metadata, body length
//! - Body (variable): `u32 key_len, key, u32 value_len, value` per entry
//! - Trailer (68 bytes): Merkle root, Alh and a CRC over body and hashes

use std::io::{self, Read, Write};

use crate::merkle::Hash;

use super::tx::{Kv, TxMetadata};

/// Segment record magic bytes "CKVT"
pub const LOG_MAGIC: [u8; 4] = *b"CKVT";

/// Current record format version
pub const LOG_VERSION: u8 = 1;

pub(crate) const CRC_ISCSI: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Record header (fixed size: 33 bytes)
///
/// Layout:
/// - magic (4 bytes)
/// - version (1 byte)
/// - tx_id (8 bytes, big-endian)
/// - timestamp (8 bytes, big-endian signed)
/// - entry_count (4 bytes, big-endian)
/// - body_len (4 bytes, big-endian)
/// - header_crc (4 bytes, big-endian)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub tx_id: u64,
    pub timestamp: i64,
    pub entry_count: u32,
    pub body_len: u32,
    pub header_crc: u32,
}

impl RecordHeader {
    /// Header size in bytes
    pub const SIZE: usize = 33;

    /// Create new header with computed CRC
    #[must_use]
    pub fn new(tx_id: u64, timestamp: i64, entry_count: u32, body_len: u32) -> Self {
        let mut header = Self {
            magic: LOG_MAGIC,
            version: LOG_VERSION,
            tx_id,
            timestamp,
            entry_count,
            body_len,
            header_crc: 0,
        };
        header.header_crc = header.compute_crc();
        header
    }

    /// CRC32 of header fields (excluding header_crc)
    #[must_use]
    pub fn compute_crc(&self) -> u32 {
        let mut digest = CRC_ISCSI.digest();
        digest.update(&self.magic);
        digest.update(&[self.version]);
        digest.update(&self.tx_id.to_be_bytes());
        digest.update(&self.timestamp.to_be_bytes());
        digest.update(&self.entry_count.to_be_bytes());
        digest.update(&self.body_len.to_be_bytes());
        digest.finalize()
    }

    /// Validate header CRC
    #[must_use]
    pub fn validate(&self) -> bool {
        self.header_crc == self.compute_crc()
    }

    /// Total encoded size of the record this header starts
    #[must_use]
    pub fn record_len(&self) -> u64 {
        (Self::SIZE + RecordTrailer::SIZE) as u64 + u64::from(self.body_len)
    }

    /// Serialize header to writer
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if write fails
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&[self.version])?;
        writer.write_all(&self.tx_id.to_be_bytes())?;
        writer.write_all(&self.timestamp.to_be_bytes())?;
        writer.write_all(&self.entry_count.to_be_bytes())?;
        writer.write_all(&self.body_len.to_be_bytes())?;
        writer.write_all(&self.header_crc.to_be_bytes())?;
        Ok(())
    }

    /// Deserialize header from reader
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if read fails
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);

        Ok(Self {
            magic,
            version: buf[4],
            tx_id: u64::from_be_bytes(be_array(&buf[5..13])),
            timestamp: i64::from_be_bytes(be_array(&buf[13..21])),
            entry_count: u32::from_be_bytes(be_array(&buf[21..25])),
            body_len: u32::from_be_bytes(be_array(&buf[25..29])),
            header_crc: u32::from_be_bytes(be_array(&buf[29..33])),
        })
    }
}

/// Smallest complete record: one entry with a 1-byte key and an empty value
///
/// A damaged header followed by fewer bytes than this cannot belong to a
/// record that was ever fully written.
pub const MIN_RECORD_LEN: u64 = (RecordHeader::SIZE + 4 + 1 + 4 + RecordTrailer::SIZE) as u64;

/// Record trailer (fixed size: 68 bytes)
///
/// Layout:
/// - eh (32 bytes)
/// - alh (32 bytes)
/// - body_crc (4 bytes, big-endian) over body, eh and alh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTrailer {
    pub eh: Hash,
    pub alh: Hash,
    pub body_crc: u32,
}

impl RecordTrailer {
    /// Trailer size in bytes
    pub const SIZE: usize = 68;

    #[must_use]
    pub fn new(body: &[u8], eh: Hash, alh: Hash) -> Self {
        Self {
            eh,
            alh,
            body_crc: Self::compute_crc(body, &eh, &alh),
        }
    }

    #[must_use]
    pub fn compute_crc(body: &[u8], eh: &Hash, alh: &Hash) -> u32 {
        let mut digest = CRC_ISCSI.digest();
        digest.update(body);
        digest.update(eh);
        digest.update(alh);
        digest.finalize()
    }

    /// Serialize trailer to writer
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if write fails
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.eh)?;
        writer.write_all(&self.alh)?;
        writer.write_all(&self.body_crc.to_be_bytes())?;
        Ok(())
    }

    /// Deserialize trailer from reader
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if read fails
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut eh = [0u8; 32];
        reader.read_exact(&mut eh)?;
        let mut alh = [0u8; 32];
        reader.read_exact(&mut alh)?;
        let mut crc_bytes = [0u8; 4];
        reader.read_exact(&mut crc_bytes)?;

        Ok(Self {
            eh,
            alh,
            body_crc: u32::from_be_bytes(crc_bytes),
        })
    }
}

/// A fully decoded, CRC-valid record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub metadata: TxMetadata,
    pub alh: Hash,
    pub entries: Vec<Kv>,
    /// Encoded length in bytes
    pub len: u64,
}

/// Outcome of decoding one record
#[derive(Debug)]
pub enum RecordRead {
    Valid(LogRecord),

    /// Header missing, short or failing its CRC: the record extent is unknown
    BadHeader,

    /// Header is sound but the rest of the record is short or fails its CRC
    BadBody { record_len: u64, reason: String },
}

/// Encode a transaction as a single record buffer
///
/// # Errors
///
/// Returns `io::Error` if the body exceeds the 4 GiB record limit
pub fn encode_record(metadata: &TxMetadata, alh: &Hash, entries: &[Kv]) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    for kv in entries {
        write_chunk(&mut body, &kv.key)?;
        write_chunk(&mut body, &kv.value)?;
    }
    let body_len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record body too large"))?;

    let header = RecordHeader::new(
        metadata.id,
        metadata.timestamp,
        metadata.entry_count,
        body_len,
    );
    let trailer = RecordTrailer::new(&body, metadata.eh, *alh);

    let mut buf = Vec::with_capacity(header.record_len() as usize);
    header.write_to(&mut buf)?;
    buf.extend_from_slice(&body);
    trailer.write_to(&mut buf)?;
    Ok(buf)
}

/// Decode the record starting at the reader's position
///
/// # Errors
///
/// Returns `io::Error` for I/O failures other than a short read, and an
/// `Unsupported` error for a CRC-valid header of an unknown version
pub fn read_record<R: Read>(reader: &mut R) -> io::Result<RecordRead> {
    let header = match RecordHeader::read_from(reader) {
        Ok(h) => h,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(RecordRead::BadHeader),
        Err(e) => return Err(e),
    };
    if !header.validate() || header.magic != LOG_MAGIC {
        return Ok(RecordRead::BadHeader);
    }
    if header.version != LOG_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("record format version {}", header.version),
        ));
    }

    let record_len = header.record_len();
    let bad_body = |reason: &str| RecordRead::BadBody {
        record_len,
        reason: format!("tx {}: {reason}", header.tx_id),
    };

    let mut body = vec![0u8; header.body_len as usize];
    let trailer = match reader
        .read_exact(&mut body)
        .and_then(|()| RecordTrailer::read_from(reader))
    {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(bad_body("record is truncated"))
        }
        Err(e) => return Err(e),
    };

    if trailer.body_crc != RecordTrailer::compute_crc(&body, &trailer.eh, &trailer.alh) {
        return Ok(bad_body("body CRC mismatch"));
    }

    let Some(entries) = decode_entries(&body, header.entry_count) else {
        return Ok(bad_body("entry layout does not match header"));
    };

    Ok(RecordRead::Valid(LogRecord {
        metadata: TxMetadata {
            id: header.tx_id,
            timestamp: header.timestamp,
            entry_count: header.entry_count,
            eh: trailer.eh,
        },
        alh: trailer.alh,
        entries,
        len: record_len,
    }))
}

fn write_chunk(buf: &mut Vec<u8>, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry too large"))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn decode_entries(mut body: &[u8], entry_count: u32) -> Option<Vec<Kv>> {
    let mut entries = Vec::with_capacity(entry_count.min(1024) as usize);
    for _ in 0..entry_count {
        let key = take_chunk(&mut body)?;
        let value = take_chunk(&mut body)?;
        entries.push(Kv { key, value });
    }
    body.is_empty().then_some(entries)
}

fn take_chunk(body: &mut &[u8]) -> Option<Vec<u8>> {
    if body.len() < 4 {
        return None;
    }
    let (len_bytes, rest) = body.split_at(4);
    let len = u32::from_be_bytes(be_array(len_bytes)) as usize;
    if rest.len() < len {
        return None;
    }
    let (chunk, rest) = rest.split_at(len);
    *body = rest;
    Some(chunk.to_vec())
}

fn be_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
