//! # Segment Codec
//!
//! A segment is one immutable record inside a region file: either a live
//! document write or a tombstone marking a deletion. Segments are encoded
//! little-endian with a fixed 26-byte header and a trailing CRC32:
//!
//! ```text
//! +-----------+--------+------------+------------+----------+------------+
//! | tombstone | kind   | expired_at | created_at | key_size | value_size |
//! | u8        | u8     | u64        | u64        | u32      | u32        |
//! +-----------+--------+------------+------------+----------+------------+
//! | key [key_size] | value [value_size] | crc32 u32 |
//! +-----------------------------------------------+
//! ```
//!
//! - `expired_at` is an absolute UNIX timestamp in seconds; 0 means the
//!   record never expires.
//! - `created_at` is an absolute UNIX timestamp in nanoseconds drawn from a
//!   monotonic write clock, so every write carries a distinct value. The
//!   compactor relies on this to decide whether a scanned segment is still
//!   the live version of its key.
//! - The CRC32 (IEEE polynomial) covers the header, key, and value bytes
//!   exactly as they lie on disk. The value is stored *after* the optional
//!   compression/encryption transform, so a segment can be copied between
//!   regions byte-for-byte without re-encoding.
//!
//! Decoding uses positional reads only; no shared seek cursor exists, so
//! readers never contend with the append path.

use std::fs::File;
use std::hash::Hasher;
use std::os::unix::fs::FileExt;

use crc::{Crc, CRC_32_ISO_HDLC};
use fnv::FnvHasher;
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::{Result, StoreError};

/// Fixed size of the segment header in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 26;

/// Size of the trailing CRC32 in bytes.
pub const SEGMENT_TRAILER_SIZE: usize = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Stable 64-bit key hash (FNV-1a). The result doubles as the index key
/// (`inum`) and is persisted inside snapshot records, so the choice of hash
/// is part of the on-disk format.
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(key);
    hasher.finish()
}

/// Document kind tag stored in the segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Set = 0,
    ZSet = 1,
    List = 2,
    Text = 3,
    Table = 4,
    Binary = 5,
    Number = 6,
    /// Only valid on tombstones, which carry no payload.
    Unknown = 7,
}

impl Kind {
    pub fn from_u8(tag: u8) -> Option<Kind> {
        match tag {
            0 => Some(Kind::Set),
            1 => Some(Kind::ZSet),
            2 => Some(Kind::List),
            3 => Some(Kind::Text),
            4 => Some(Kind::Table),
            5 => Some(Kind::Binary),
            6 => Some(Kind::Number),
            7 => Some(Kind::Unknown),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// On-disk segment header. Field order and widths are fixed; all integers
/// are little-endian with byte alignment, so the struct maps directly onto
/// the 26 header bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable)]
pub struct SegmentHeader {
    pub tombstone: u8,
    pub kind: u8,
    pub expired_at: U64,
    pub created_at: U64,
    pub key_size: U32,
    pub value_size: U32,
}

/// One decoded (or to-be-encoded) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub tombstone: u8,
    pub kind: Kind,
    pub expired_at: u64,
    pub created_at: u64,
    pub key: Vec<u8>,
    /// Value bytes as stored on disk (after the value transform).
    pub value: Vec<u8>,
}

impl Segment {
    /// Builds a live record. `value` must already carry the on-disk
    /// (transformed) representation of the document payload.
    pub fn record(
        key: &[u8],
        kind: Kind,
        value: Vec<u8>,
        created_at: u64,
        expired_at: u64,
    ) -> Segment {
        Segment {
            tombstone: 0,
            kind,
            expired_at,
            created_at,
            key: key.to_vec(),
            value,
        }
    }

    /// Builds a delete marker: empty value, unknown kind.
    pub fn tombstone(key: &[u8], created_at: u64) -> Segment {
        Segment {
            tombstone: 1,
            kind: Kind::Unknown,
            expired_at: 0,
            created_at,
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.tombstone == 1
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expired_at != 0 && self.expired_at <= now_secs
    }

    /// Total encoded length: header + key + value + CRC.
    pub fn total_len(&self) -> Result<u32> {
        let len = (SEGMENT_HEADER_SIZE + SEGMENT_TRAILER_SIZE)
            .checked_add(self.key.len())
            .and_then(|n| n.checked_add(self.value.len()))
            .ok_or(StoreError::Overflow)?;
        u32::try_from(len).map_err(|_| StoreError::Overflow)
    }

    /// Produces the exact on-disk byte sequence for this segment.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let total = self.total_len()? as usize;
        let key_size = u32::try_from(self.key.len()).map_err(|_| StoreError::Overflow)?;
        let value_size = u32::try_from(self.value.len()).map_err(|_| StoreError::Overflow)?;

        let header = SegmentHeader {
            tombstone: self.tombstone,
            kind: self.kind.as_u8(),
            expired_at: U64::new(self.expired_at),
            created_at: U64::new(self.created_at),
            key_size: U32::new(key_size),
            value_size: U32::new(value_size),
        };

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = CRC32.checksum(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }
}

/// Reads and validates the segment starting at `position` in `file`.
///
/// Returns the key hash and the decoded segment with its value still in
/// on-disk form. Fails with [`StoreError::ShortRead`] when the record
/// extends past the end of the file (a torn tail), and with
/// [`StoreError::Corrupt`] on a CRC mismatch or an invalid kind tag.
pub fn decode_at(file: &File, position: u64) -> Result<(u64, Segment)> {
    let file_len = file.metadata()?.len();

    let header_end = position + SEGMENT_HEADER_SIZE as u64;
    if header_end > file_len {
        return Err(StoreError::ShortRead(position));
    }

    let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
    read_exact_at(file, &mut header_bytes, position)?;

    let header = SegmentHeader::read_from_bytes(&header_bytes[..])
        .map_err(|_| StoreError::Corrupt(format!("unreadable header at offset {position}")))?;

    let key_size = header.key_size.get() as u64;
    let value_size = header.value_size.get() as u64;
    let body_len = key_size + value_size + SEGMENT_TRAILER_SIZE as u64;
    if header_end + body_len > file_len {
        return Err(StoreError::ShortRead(position));
    }

    let mut body = vec![0u8; body_len as usize];
    read_exact_at(file, &mut body, header_end)?;

    let (payload, trailer) = body.split_at(body.len() - SEGMENT_TRAILER_SIZE);
    let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

    let mut digest = CRC32.digest();
    digest.update(&header_bytes);
    digest.update(payload);
    let computed_crc = digest.finalize();

    if stored_crc != computed_crc {
        return Err(StoreError::Corrupt(format!(
            "crc mismatch at offset {position}: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let kind = Kind::from_u8(header.kind).ok_or_else(|| {
        StoreError::Corrupt(format!(
            "invalid kind tag {} at offset {position}",
            header.kind
        ))
    })?;

    let key = payload[..key_size as usize].to_vec();
    let value = payload[key_size as usize..].to_vec();
    let inum = hash_key(&key);

    Ok((
        inum,
        Segment {
            tombstone: header.tombstone,
            kind,
            expired_at: header.expired_at.get(),
            created_at: header.created_at.get(),
            key,
            value,
        },
    ))
}

fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreError::ShortRead(offset)
        } else {
            StoreError::Io(err)
        }
    })
}
