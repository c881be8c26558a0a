//! Error types for RidgeDB.
//!
//! The engine distinguishes a fixed set of failure kinds so that embedding
//! code can match on them: a missing key is `NotFound`, a checksum failure is
//! `Corrupt`, a record cut off by a crash is `ShortRead`, and so on. All
//! fallible public APIs return [`Result`].

use thiserror::Error;

use crate::storage::segment::Kind;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The key does not exist, was deleted, or its TTL has elapsed.
    #[error("key not found")]
    NotFound,

    /// A segment or snapshot record failed its CRC32 check.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A record extends past the end of the file (torn tail after a crash).
    #[error("short read: record truncated at offset {0}")]
    ShortRead(u64),

    /// Decompression or decryption of a value payload failed.
    #[error("value transform failed: {0}")]
    Transform(String),

    /// The stored document kind differs from the requested one.
    #[error("kind mismatch: expected {expected:?}, found {actual:?}")]
    KindMismatch { expected: Kind, actual: Kind },

    /// The encryption secret is not a valid AES key length.
    #[error("encryption secret must be 16, 24, or 32 bytes, got {0}")]
    SecretLength(usize),

    /// A data or index file does not start with the expected magic bytes.
    #[error("unsupported file magic: {0}")]
    UnsupportedMagic(String),

    /// A file in the data directory does not match the region naming scheme.
    #[error("invalid region file name: {0}")]
    InvalidFileName(String),

    /// Size arithmetic overflowed while encoding a record.
    #[error("record size arithmetic overflow")]
    Overflow,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Invalid configuration detected at open time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A document payload failed to serialize or deserialize.
    #[error("document codec error: {0}")]
    Codec(String),
}
