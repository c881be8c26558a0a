//! # Storage Engine
//!
//! [`Store`] glues the storage layer together under one concurrency model:
//!
//! - A single engine `RwLock` guards the region set. Its write side
//!   serializes appends, rotation, and region-map mutation; its read side
//!   only hands out shared file handles, so lookups never queue behind a
//!   writer for longer than a map access. Actual record reads are
//!   positional and happen outside every lock.
//! - Each index shard has its own read–write lock. Every mutating path
//!   takes the engine lock first and the shard lock second; `get` drops the
//!   shard lock before touching the engine lock, so no cycle exists.
//! - The append and its index update share one engine-write-lock scope,
//!   which makes index order identical to append order: of two racing
//!   writers to a key, the one whose segment lies later in the log is the
//!   one the index (and any future recovery) agrees on.
//!
//! ## Lifecycle
//!
//! `open` validates the configuration, recovers the region set, restores
//! the index (snapshot if present, full scan otherwise), and starts the
//! compactor when enabled. `close` stops the compactor, syncs the active
//! region, and writes the index snapshot; it does not interrupt in-flight
//! operations, so callers quiesce writes first. Dropping an unclosed store
//! stops the compactor but deliberately writes no snapshot — the next open
//! rebuilds from the regions, exactly as after a crash.
//!
//! ## Write timestamps
//!
//! Every write draws `created_at` from a process-wide monotonic nanosecond
//! clock (`WriteClock`), never reusing a value. The compactor leans on
//! this: matching `created_at` between a segment and its inode is what
//! proves the segment is still the live version of its key.

mod compactor;

pub use compactor::GcState;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::Options;
use crate::error::{Result, StoreError};
use crate::storage::index::{Inode, ShardedIndex, INDEX_SHARD_COUNT};
use crate::storage::region::{RegionManager, INDEX_FILE_NAME};
use crate::storage::segment::{self, hash_key, Segment};
use crate::storage::snapshot;
use crate::storage::transformer::Transformer;
use crate::types::Document;

/// Current UNIX time in whole seconds.
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn unix_now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Monotonic nanosecond timestamps: never repeats, never goes backwards,
/// even when the wall clock does.
struct WriteClock {
    last: AtomicU64,
}

impl WriteClock {
    fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn next(&self) -> u64 {
        let now = unix_now_nanos();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

pub(crate) struct Shared {
    directory: PathBuf,
    fs_perm: u32,
    regions: RwLock<RegionManager>,
    index: ShardedIndex,
    transformer: Transformer,
    clock: WriteClock,
    gc_min_regions: usize,
    compactor: compactor::Compactor,
    closed: AtomicBool,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.compactor.stop();
    }
}

/// An open store instance. Cheap to clone; all clones share one engine.
///
/// ```no_run
/// use ridgedb::{Options, Store, Text};
///
/// # fn main() -> ridgedb::Result<()> {
/// let store = Store::open(Options::new("/var/lib/ridgedb"))?;
/// store.put("greeting", &Text::new("hello").into(), 0)?;
/// let doc = store.get("greeting")?;
/// assert_eq!(doc.into_text()?.as_str(), "hello");
/// store.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Opens (or creates) the store at `options.path` and recovers its
    /// index. Multiple stores over disjoint directories coexist freely;
    /// nothing here is process-global.
    pub fn open(options: Options) -> Result<Store> {
        options.validate()?;

        let mut transformer = Transformer::new();
        if options.compressor.enable {
            transformer.enable_compression();
        }
        if options.encryptor.enable {
            transformer.enable_encryption(options.encryptor.secret.as_bytes())?;
        }

        let regions = RegionManager::open(&options.path, options.fs_perm, options.rotation_threshold())?;

        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        let snapshot_path = options.path.join(INDEX_FILE_NAME);
        if snapshot_path.exists() {
            if let Err(err) = snapshot::load(&snapshot_path, &index) {
                warn!(error = %err, "index snapshot unusable, rebuilding from regions");
                index.clear();
                snapshot::rebuild(&regions, &index, unix_now_secs())?;
            }
            // A snapshot describes the index as of a clean close only;
            // consume it so a crash from here on falls back to a rebuild.
            fs::remove_file(&snapshot_path)?;
        } else {
            snapshot::rebuild(&regions, &index, unix_now_secs())?;
        }

        let store = Store {
            shared: Arc::new(Shared {
                directory: options.path.clone(),
                fs_perm: options.fs_perm,
                regions: RwLock::new(regions),
                index,
                transformer,
                clock: WriteClock::new(),
                gc_min_regions: options.region.min_regions,
                compactor: compactor::Compactor::new(),
                closed: AtomicBool::new(false),
            }),
        };

        if options.region.enable {
            store.start_gc(Duration::from_secs(options.region.second))?;
        }

        debug!(
            directory = %store.shared.directory.display(),
            keys = store.key_count(),
            "store opened"
        );
        Ok(store)
    }

    /// Writes a document under `key`. `ttl_seconds == 0` means the record
    /// never expires.
    pub fn put(&self, key: &str, document: &Document, ttl_seconds: u64) -> Result<()> {
        self.ensure_open()?;

        let payload = document.encode()?;
        let value = self.shared.transformer.encode(payload)?;

        let created_at = self.shared.clock.next();
        let expired_at = if ttl_seconds == 0 {
            0
        } else {
            unix_now_secs().saturating_add(ttl_seconds)
        };

        let seg = Segment::record(key.as_bytes(), document.kind(), value, created_at, expired_at);
        let bytes = seg.encode()?;
        let inum = hash_key(key.as_bytes());

        let mut regions = self.shared.regions.write();
        let position = regions.append(&bytes)?;
        let region_id = regions.active_id();
        self.shared.index.insert(
            inum,
            Inode {
                region_id,
                position,
                length: bytes.len() as u32,
                expired_at,
                created_at,
            },
        );
        if regions.should_rotate() {
            regions.rotate()?;
        }
        Ok(())
    }

    /// Fetches the document stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] when the key is absent, deleted, or
    /// expired; an expired entry is evicted from the index on the way out.
    pub fn get(&self, key: &str) -> Result<Document> {
        self.ensure_open()?;

        let inum = hash_key(key.as_bytes());
        let inode = self.shared.index.lookup(inum).ok_or(StoreError::NotFound)?;

        let now = unix_now_secs();
        if inode.is_expired(now) {
            self.shared.index.evict_expired(inum, now);
            return Err(StoreError::NotFound);
        }

        let file = self
            .shared
            .regions
            .read()
            .handle(inode.region_id)
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "index points at missing region {}",
                    inode.region_id
                ))
            })?;

        // Positional read outside every lock; appends proceed in parallel.
        let (_, seg) = match segment::decode_at(&file, inode.position) {
            Ok(decoded) => decoded,
            // The index promised a whole record here, so hitting EOF is
            // damage, not a torn tail.
            Err(StoreError::ShortRead(offset)) => {
                return Err(StoreError::Corrupt(format!(
                    "indexed record truncated at offset {offset}"
                )))
            }
            Err(err) => return Err(err),
        };

        let payload = self.shared.transformer.decode(seg.value)?;
        Document::decode(seg.kind, &payload)
    }

    /// Deletes `key`: drops its inode and logs a tombstone so that a
    /// post-crash rebuild observes the deletion. Deleting an absent key is
    /// not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;

        let inum = hash_key(key.as_bytes());
        let created_at = self.shared.clock.next();
        let bytes = Segment::tombstone(key.as_bytes(), created_at).encode()?;

        let mut regions = self.shared.regions.write();
        regions.append(&bytes)?;
        self.shared.index.remove(inum);
        if regions.should_rotate() {
            regions.rotate()?;
        }
        Ok(())
    }

    /// Resolves each key in order, failing fast on the first miss or error.
    pub fn batch_get(&self, keys: &[&str]) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            documents.push(self.get(key)?);
        }
        Ok(documents)
    }

    /// Number of live keys in the index. Approximate while writers are
    /// active.
    pub fn key_count(&self) -> usize {
        self.shared.index.len()
    }

    /// The data directory this store operates on.
    pub fn directory(&self) -> &Path {
        &self.shared.directory
    }

    /// Starts the background compactor. Idempotent while it is already
    /// started.
    pub fn start_gc(&self, period: Duration) -> Result<()> {
        self.ensure_open()?;
        self.shared
            .compactor
            .start(Arc::downgrade(&self.shared), period)
    }

    /// Stops the compactor, draining any in-flight pass first.
    pub fn stop_gc(&self) {
        self.shared.compactor.stop();
    }

    pub fn gc_state(&self) -> GcState {
        self.shared.compactor.state()
    }

    /// Runs a single compaction pass on the calling thread. Mainly useful
    /// for tests and operational tooling; the background worker does the
    /// same thing on its timer.
    pub fn compact_now(&self) -> Result<()> {
        self.ensure_open()?;
        compactor::run_pass(&self.shared)
    }

    /// Writes the index snapshot to `index.rdb` inside the data directory.
    pub fn export_snapshot(&self) -> Result<()> {
        snapshot::export(
            &self.shared.index,
            &self.shared.directory.join(INDEX_FILE_NAME),
            self.shared.fs_perm,
        )
    }

    /// Cleanly shuts the store down: compactor drained, active region
    /// synced, index snapshot written. Further operations fail with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }

        self.shared.compactor.stop();
        self.shared.regions.write().sync()?;
        self.export_snapshot()?;

        debug!(directory = %self.shared.directory.display(), "store closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_clock_is_strictly_monotonic() {
        let clock = WriteClock::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let next = clock.next();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn write_clock_is_unique_across_threads() {
        let clock = Arc::new(WriteClock::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| clock.next()).collect::<Vec<u64>>()
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "write clock produced duplicates");
    }
}
