//! # RidgeDB
//!
//! An embeddable, single-node key–value store on a log-structured file
//! layout:
//!
//! - **Typed documents** — sets, sorted sets, lists, tables, text, numbers,
//!   and raw binary, each with an optional TTL.
//! - **Append-only regions** — writes go to the tail of the active region
//!   file; files rotate at a size threshold and are reclaimed by a
//!   background compactor once their records die.
//! - **Sharded in-memory index** — reads resolve a key hash to an on-disk
//!   location through independently locked index shards.
//! - **Crash recovery** — every record carries a CRC32; startup restores
//!   the index from a snapshot written at clean shutdown, or rebuilds it by
//!   scanning the regions and discarding any torn tail.
//! - **Value transforms** — optional Snappy compression and AES-CBC
//!   encryption of stored payloads.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                    Store                      │
//! │   put / get / delete / batch_get / key_count  │
//! └───────┬───────────────────────────┬───────────┘
//!         │                           │
//! ┌───────▼────────┐          ┌───────▼────────┐
//! │ Sharded index  │          │ Region manager │
//! │ (inum → inode) │          │ (append-only)  │
//! └───────┬────────┘          └───────┬────────┘
//!         │   snapshot / rebuild      │
//! ┌───────▼───────────────────────────▼────────┐
//! │      Segments on disk (CRC32 records)      │
//! └────────────────────────────────────────────┘
//!                       ▲
//!               ┌───────┴────────┐
//!               │   Compactor    │
//!               │ (timer thread) │
//!               └────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use ridgedb::{Options, Store, Text};
//!
//! # fn main() -> ridgedb::Result<()> {
//! let store = Store::open(Options::new("./data"))?;
//!
//! store.put("hello", &Text::new("world").into(), 0)?;
//! assert_eq!(store.get("hello")?.into_text()?.as_str(), "world");
//!
//! store.delete("hello")?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod storage;
pub mod store;
pub mod types;

pub use config::Options;
pub use error::{Result, StoreError};
pub use storage::segment::Kind;
pub use store::{GcState, Store};
pub use types::{Binary, Document, List, Number, Set, Table, Text, Value, ZSet};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
