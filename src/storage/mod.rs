//! # Storage Layer
//!
//! The on-disk machinery under the engine: the region files, the record
//! codec, the optional value transforms, the sharded in-memory index, and
//! the two recovery paths.
//!
//! ```text
//! put/get/delete (store)
//!        │
//!        ▼
//! ┌──────────────┐   append/pread    ┌───────────────────────────┐
//! │ segment      │◄─────────────────►│ region                     │
//! │ (codec, CRC) │                   │ (files, rotation, handles) │
//! └──────┬───────┘                   └───────────────────────────┘
//!        │ value bytes
//!        ▼
//! ┌──────────────┐                   ┌───────────────────────────┐
//! │ transformer  │                   │ index                      │
//! │ (snappy/aes) │                   │ (sharded inum → inode map) │
//! └──────────────┘                   └─────────────┬─────────────┘
//!                                                  │
//!                                    ┌─────────────▼─────────────┐
//!                                    │ snapshot                   │
//!                                    │ (export / load / rebuild)  │
//!                                    └───────────────────────────┘
//! ```
//!
//! Everything here is mechanism; policy (locking discipline, TTL checks,
//! compaction scheduling) lives in the `store` module.

pub mod index;
pub mod region;
pub mod segment;
pub mod snapshot;
pub mod transformer;

pub use index::{Inode, ShardedIndex, INDEX_SHARD_COUNT};
pub use region::{RegionManager, INDEX_FILE_NAME, REGION_FILE_EXTENSION, REGION_MAGIC};
pub use segment::{Kind, Segment, SEGMENT_HEADER_SIZE, SEGMENT_TRAILER_SIZE};
pub use transformer::Transformer;
