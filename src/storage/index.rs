//! # Sharded Inode Index
//!
//! The in-memory map from key hash (`inum`) to the on-disk location of the
//! key's latest live segment. The map is partitioned across a fixed number
//! of shards, each guarded by its own `parking_lot::RwLock`, so writes to
//! different shards never contend. Routing is `inum % shard_count`.
//!
//! The shard count is fixed when the store opens. It is deliberately small:
//! every put already serializes on the engine's append lock, so a handful of
//! shards is enough to keep index updates off the critical path.

use hashbrown::HashMap;
use parking_lot::RwLock;

/// Default number of index shards.
pub const INDEX_SHARD_COUNT: usize = 5;

/// Location and lifetime of a key's latest live segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub region_id: u64,
    /// Absolute byte offset of the segment start within its region.
    pub position: u64,
    /// Total encoded length of the segment.
    pub length: u32,
    /// UNIX seconds; 0 means the record never expires.
    pub expired_at: u64,
    /// Nanosecond write timestamp; matches the segment's `created_at` and
    /// witnesses which write an inode refers to.
    pub created_at: u64,
}

impl Inode {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expired_at != 0 && self.expired_at <= now_secs
    }
}

/// The sharded `inum -> Inode` map.
pub struct ShardedIndex {
    shards: Vec<RwLock<HashMap<u64, Inode>>>,
}

impl ShardedIndex {
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "index needs at least one shard");
        Self {
            shards: (0..shard_count)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, inum: u64) -> &RwLock<HashMap<u64, Inode>> {
        &self.shards[(inum % self.shards.len() as u64) as usize]
    }

    /// Inserts or replaces the entry for `inum`.
    pub fn insert(&self, inum: u64, inode: Inode) {
        self.shard(inum).write().insert(inum, inode);
    }

    pub fn lookup(&self, inum: u64) -> Option<Inode> {
        self.shard(inum).read().get(&inum).copied()
    }

    /// Removes the entry for `inum`; a no-op when absent.
    pub fn remove(&self, inum: u64) -> Option<Inode> {
        self.shard(inum).write().remove(&inum)
    }

    /// Removes the entry only if it is expired at `now_secs`. Re-checks
    /// under the write lock, so a concurrent overwrite survives.
    pub fn evict_expired(&self, inum: u64, now_secs: u64) -> bool {
        let mut shard = self.shard(inum).write();
        match shard.get(&inum) {
            Some(inode) if inode.is_expired(now_secs) => {
                shard.remove(&inum);
                true
            }
            _ => false,
        }
    }

    /// Repoints the entry at a new location, but only while it still refers
    /// to the same write (witnessed by `created_at`). Returns whether the
    /// entry was updated. Used by the compactor after copying a segment
    /// forward.
    pub fn relocate(&self, inum: u64, created_at: u64, region_id: u64, position: u64) -> bool {
        let mut shard = self.shard(inum).write();
        match shard.get_mut(&inum) {
            Some(inode) if inode.created_at == created_at => {
                inode.region_id = region_id;
                inode.position = position;
                true
            }
            _ => false,
        }
    }

    /// Total entry count, summed shard by shard. Approximate under
    /// concurrent writers.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry. Used when a snapshot restore fails partway and
    /// the index must be rebuilt from the regions instead.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Visits every entry, one shard at a time under that shard's read
    /// lock. Entries inserted or removed concurrently may or may not be
    /// observed.
    pub fn for_each(&self, mut visit: impl FnMut(u64, &Inode)) {
        for shard in &self.shards {
            let shard = shard.read();
            for (inum, inode) in shard.iter() {
                visit(*inum, inode);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inode(region_id: u64, created_at: u64) -> Inode {
        Inode {
            region_id,
            position: 4,
            length: 64,
            expired_at: 0,
            created_at,
        }
    }

    #[test]
    fn insert_lookup_remove() {
        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        index.insert(42, inode(1, 100));

        assert_eq!(index.lookup(42), Some(inode(1, 100)));
        assert_eq!(index.len(), 1);

        assert!(index.remove(42).is_some());
        assert_eq!(index.lookup(42), None);
        assert!(index.remove(42).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn insert_replaces_previous_entry() {
        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        index.insert(7, inode(1, 100));
        index.insert(7, inode(2, 200));

        assert_eq!(index.lookup(7), Some(inode(2, 200)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn entries_spread_across_shards() {
        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        for inum in 0..50 {
            index.insert(inum, inode(1, inum));
        }
        assert_eq!(index.len(), 50);

        let mut seen = 0;
        index.for_each(|_, _| seen += 1);
        assert_eq!(seen, 50);
    }

    #[test]
    fn relocate_requires_matching_created_at() {
        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        index.insert(9, inode(1, 100));

        assert!(!index.relocate(9, 999, 5, 4096));
        assert_eq!(index.lookup(9).unwrap().region_id, 1);

        assert!(index.relocate(9, 100, 5, 4096));
        let moved = index.lookup(9).unwrap();
        assert_eq!(moved.region_id, 5);
        assert_eq!(moved.position, 4096);
        // The witness itself is unchanged by a move.
        assert_eq!(moved.created_at, 100);
    }

    #[test]
    fn evict_expired_rechecks_under_the_write_lock() {
        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        let mut stale = inode(1, 100);
        stale.expired_at = 50;
        index.insert(3, stale);

        assert!(!index.evict_expired(3, 49));
        assert!(index.lookup(3).is_some());

        assert!(index.evict_expired(3, 50));
        assert!(index.lookup(3).is_none());
        assert!(!index.evict_expired(3, 50));
    }
}
