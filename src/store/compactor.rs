//! # Background Compactor
//!
//! Regions only ever grow; overwrites and deletes leave dead segments
//! behind. The compactor reclaims that space on a timer: it rewrites the
//! still-live records out of the oldest regions into the active region,
//! repoints their inodes, and deletes the drained files.
//!
//! ## State machine
//!
//! ```text
//! Init ──start(period)──► Stopped ──tick──► Running ──pass done──► Stopped
//!   ▲                        │                 │
//!   └────────── stop() ◄─────┴───── stop() ────┘  (drains first)
//! ```
//!
//! `start` is idempotent once past `Init`. `stop` wakes the worker, waits a
//! bounded ~3 s for an in-flight pass to drain, joins the thread, and
//! returns the state word to `Init`.
//!
//! ## Liveness witness
//!
//! A scanned segment is live exactly when the index still holds an inode
//! for its key whose `created_at` equals the segment's. Timestamps come
//! from a monotonic nanosecond clock, so no two writes share one; a
//! mismatch means the segment was superseded and can be dropped. Live
//! segments are copied forward byte-for-byte (the CRC stays valid) and the
//! inode is repointed under the same witness check, so a racing overwrite
//! always wins.
//!
//! A pass that fails logs and aborts without touching the source region;
//! whatever it already copied is plain duplicate data that a later pass
//! reclaims.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::storage::region::REGION_MAGIC_SIZE;
use crate::storage::segment;

use super::{unix_now_secs, Shared};

/// Fraction of regions (oldest first) considered dirty in one pass.
const DIRTY_REGION_RATIO: f64 = 0.4;

/// How long `stop` waits for an in-flight pass before joining anyway.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

const STATE_INIT: u8 = 0;
const STATE_STOPPED: u8 = 1;
const STATE_RUNNING: u8 = 2;

/// Externally observable compactor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// Not started, or stopped for good.
    Init,
    /// Started and waiting for the next tick.
    Stopped,
    /// A pass is in flight.
    Running,
}

struct GcControl {
    state: AtomicU8,
    shutdown: AtomicBool,
    sleeper: Mutex<()>,
    tick: Condvar,
}

/// Owns the worker thread and its shared control word.
pub(crate) struct Compactor {
    control: Arc<GcControl>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Compactor {
    pub(crate) fn new() -> Self {
        Self {
            control: Arc::new(GcControl {
                state: AtomicU8::new(STATE_INIT),
                shutdown: AtomicBool::new(false),
                sleeper: Mutex::new(()),
                tick: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> GcState {
        match self.control.state.load(Ordering::Acquire) {
            STATE_STOPPED => GcState::Stopped,
            STATE_RUNNING => GcState::Running,
            _ => GcState::Init,
        }
    }

    /// Spawns the worker. A no-op when the compactor is already past
    /// `Init`.
    pub(crate) fn start(&self, store: Weak<Shared>, period: Duration) -> Result<()> {
        if self
            .control
            .state
            .compare_exchange(STATE_INIT, STATE_STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.control.shutdown.store(false, Ordering::Release);

        let control = self.control.clone();
        let handle = thread::Builder::new()
            .name("ridgedb-gc".into())
            .spawn(move || gc_loop(control, store, period))
            .map_err(StoreError::Io)?;
        *self.worker.lock() = Some(handle);

        debug!(period_secs = period.as_secs(), "compactor started");
        Ok(())
    }

    /// Signals shutdown, drains any running pass (bounded), joins the
    /// worker, and resets to `Init`. Safe to call repeatedly.
    pub(crate) fn stop(&self) {
        let handle = self.worker.lock().take();
        if handle.is_none() && self.state() == GcState::Init {
            return;
        }

        self.control.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.control.sleeper.lock();
            self.control.tick.notify_all();
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.control.state.load(Ordering::Acquire) == STATE_RUNNING
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }

        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.control.state.store(STATE_INIT, Ordering::Release);
    }
}

fn gc_loop(control: Arc<GcControl>, store: Weak<Shared>, period: Duration) {
    loop {
        {
            let mut guard = control.sleeper.lock();
            if control.shutdown.load(Ordering::Acquire) {
                return;
            }
            control.tick.wait_for(&mut guard, period);
        }
        if control.shutdown.load(Ordering::Acquire) {
            return;
        }

        let Some(shared) = store.upgrade() else {
            return;
        };

        if control
            .state
            .compare_exchange(STATE_STOPPED, STATE_RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            continue;
        }
        if let Err(err) = run_pass(&shared) {
            warn!(error = %err, "compaction pass aborted");
        }
        control.state.store(STATE_STOPPED, Ordering::Release);
    }
}

/// One compaction pass over the oldest regions. Also callable inline (the
/// tests drive it directly through `Store::compact_now`).
pub(crate) fn run_pass(shared: &Shared) -> Result<()> {
    let (ids, total, active_id) = {
        let regions = shared.regions.read();
        (
            regions.ids_ascending(),
            regions.region_count(),
            regions.active_id(),
        )
    };

    if total < shared.gc_min_regions {
        return Ok(());
    }
    let dirty_count = (total as f64 * DIRTY_REGION_RATIO) as usize;
    if dirty_count == 0 {
        return Ok(());
    }

    let dirty: Vec<u64> = ids
        .into_iter()
        .filter(|&id| id != active_id)
        .take(dirty_count)
        .collect();

    let now = unix_now_secs();
    let mut moved = 0usize;
    let mut dropped = 0usize;

    for region_id in dirty {
        let file = match shared.regions.read().handle(region_id) {
            Some(file) => file,
            None => continue,
        };
        let file_len = file.metadata()?.len();
        let mut position = REGION_MAGIC_SIZE;

        while position < file_len {
            let (inum, seg) = match segment::decode_at(&file, position) {
                Ok(decoded) => decoded,
                Err(StoreError::Corrupt(_)) | Err(StoreError::ShortRead(_)) => {
                    warn!(region_id, position, "stopping scan at torn record");
                    break;
                }
                Err(err) => return Err(err),
            };
            let length = seg.total_len()?;

            let live = !seg.is_tombstone()
                && !seg.is_expired(now)
                && shared
                    .index
                    .lookup(inum)
                    .is_some_and(|inode| inode.created_at == seg.created_at);

            if live {
                let bytes = seg.encode()?;
                let mut regions = shared.regions.write();
                let new_position = regions.append(&bytes)?;
                let new_region = regions.active_id();
                // Re-checked under the shard lock: a concurrent overwrite
                // between the lookup and this move keeps its newer inode,
                // and the copied bytes become dead weight for a later pass.
                if shared
                    .index
                    .relocate(inum, seg.created_at, new_region, new_position)
                {
                    moved += 1;
                } else {
                    dropped += 1;
                }
                if regions.should_rotate() {
                    regions.rotate()?;
                }
            } else {
                dropped += 1;
            }

            position += length as u64;
        }

        shared.regions.write().remove_region(region_id)?;
        info!(region_id, "reclaimed dirty region");
    }

    info!(moved, dropped, "compaction pass finished");
    Ok(())
}
