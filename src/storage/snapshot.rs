//! # Index Snapshot & Recovery
//!
//! Two ways to get the inode index back after a restart:
//!
//! 1. **Snapshot restore.** A clean close writes `index.rdb`: the 4-byte
//!    magic followed by a dense array of fixed 48-byte records, one per
//!    index entry, each closed by a CRC32 over its first 44 bytes. Loading
//!    memory-maps the file and streams records through a bounded
//!    producer/consumer pair: one thread parses and CRC-checks, the other
//!    installs into the shards, overlapping disk reads with hashing. The
//!    first bad record cancels the whole restore.
//!
//! 2. **Rebuild by scan.** Without a snapshot, every region is scanned in
//!    ascending id order. Later writes overwrite earlier index entries
//!    because of the scan order; tombstones and already-expired records
//!    remove the key. A CRC failure or short read inside a region is a torn
//!    tail from a crash: the scan of that region stops there and the
//!    partial record is discarded.
//!
//! A restored snapshot file is deleted right after loading. Snapshots only
//! describe the index as of a clean close; once new writes land, a stale
//! file left behind could be mistaken for current state by a future
//! restart.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use crc::{Crc, CRC_32_ISO_HDLC};
use memmap2::Mmap;
use tracing::{debug, warn};
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::{Result, StoreError};
use crate::storage::index::{Inode, ShardedIndex};
use crate::storage::region::{RegionManager, REGION_MAGIC, REGION_MAGIC_SIZE};
use crate::storage::segment;

/// Fixed size of one serialized index record.
pub const INDEX_RECORD_SIZE: usize = 48;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// On-disk index record: `(inum, inode)` plus a trailing CRC32 over the
/// preceding 44 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable)]
struct IndexRecord {
    inum: U64,
    region_id: U64,
    position: U64,
    length: U32,
    expired_at: U64,
    created_at: U64,
    crc: U32,
}

impl IndexRecord {
    fn new(inum: u64, inode: &Inode) -> IndexRecord {
        let mut record = IndexRecord {
            inum: U64::new(inum),
            region_id: U64::new(inode.region_id),
            position: U64::new(inode.position),
            length: U32::new(inode.length),
            expired_at: U64::new(inode.expired_at),
            created_at: U64::new(inode.created_at),
            crc: U32::new(0),
        };
        let crc = CRC32.checksum(&record.as_bytes()[..INDEX_RECORD_SIZE - 4]);
        record.crc = U32::new(crc);
        record
    }

    fn verify(&self) -> bool {
        let computed = CRC32.checksum(&self.as_bytes()[..INDEX_RECORD_SIZE - 4]);
        computed == self.crc.get()
    }

    fn inode(&self) -> Inode {
        Inode {
            region_id: self.region_id.get(),
            position: self.position.get(),
            length: self.length.get(),
            expired_at: self.expired_at.get(),
            created_at: self.created_at.get(),
        }
    }
}

/// Writes the whole index to `path`, truncating any previous snapshot.
/// Entries are streamed shard by shard under each shard's read lock; the
/// index is already unique per key, so no dedup pass is needed.
pub fn export(index: &ShardedIndex, path: &Path, fs_perm: u32) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(fs_perm)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&REGION_MAGIC)?;

    let mut io_error = None;
    let mut written = 0usize;
    index.for_each(|inum, inode| {
        if io_error.is_some() {
            return;
        }
        let record = IndexRecord::new(inum, inode);
        if let Err(err) = writer.write_all(record.as_bytes()) {
            io_error = Some(err);
        } else {
            written += 1;
        }
    });
    if let Some(err) = io_error {
        return Err(err.into());
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    debug!(records = written, path = %path.display(), "exported index snapshot");
    Ok(())
}

/// Restores the index from a snapshot file, returning the number of
/// records installed. Any malformed or CRC-failing record cancels the
/// restore with an error; the caller should clear the index and fall back
/// to [`rebuild`].
pub fn load(path: &Path, index: &ShardedIndex) -> Result<usize> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < REGION_MAGIC.len() || mmap[..REGION_MAGIC.len()] != REGION_MAGIC {
        return Err(StoreError::UnsupportedMagic(path.display().to_string()));
    }

    let body = &mmap[REGION_MAGIC.len()..];
    if body.len() % INDEX_RECORD_SIZE != 0 {
        return Err(StoreError::ShortRead(mmap.len() as u64));
    }

    let record_count = body.len() / INDEX_RECORD_SIZE;
    let (tx, rx) = mpsc::sync_channel::<(u64, Inode)>(record_count.max(1));

    let installed = thread::scope(|scope| -> Result<usize> {
        let producer = scope.spawn(move || -> Result<()> {
            for (i, chunk) in body.chunks_exact(INDEX_RECORD_SIZE).enumerate() {
                let record = IndexRecord::read_from_bytes(chunk)
                    .map_err(|_| StoreError::Corrupt(format!("unreadable index record {i}")))?;
                if !record.verify() {
                    return Err(StoreError::Corrupt(format!(
                        "crc mismatch in index record {i}"
                    )));
                }
                // The consumer only disconnects on its own error path.
                if tx.send((record.inum.get(), record.inode())).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut installed = 0usize;
        for (inum, inode) in rx {
            index.insert(inum, inode);
            installed += 1;
        }

        producer.join().expect("snapshot producer panicked")?;
        Ok(installed)
    })?;

    debug!(records = installed, path = %path.display(), "restored index snapshot");
    Ok(installed)
}

/// Rebuilds the index by scanning every region in ascending id order.
///
/// `now_secs` is the wall-clock second used for TTL decisions: a key whose
/// latest write has already expired is removed rather than resurrected
/// from an older version.
pub fn rebuild(regions: &RegionManager, index: &ShardedIndex, now_secs: u64) -> Result<()> {
    for region_id in regions.ids_ascending() {
        let file = match regions.handle(region_id) {
            Some(file) => file,
            None => continue,
        };
        let file_len = file.metadata()?.len();
        let mut position = REGION_MAGIC_SIZE;

        while position < file_len {
            let (inum, seg) = match segment::decode_at(&file, position) {
                Ok(decoded) => decoded,
                Err(StoreError::Corrupt(_)) | Err(StoreError::ShortRead(_)) => {
                    warn!(
                        region_id,
                        position, "discarding torn tail during index rebuild"
                    );
                    break;
                }
                Err(err) => return Err(err),
            };
            let length = seg.total_len()?;

            if seg.is_tombstone() || seg.is_expired(now_secs) {
                index.remove(inum);
            } else {
                index.insert(
                    inum,
                    Inode {
                        region_id,
                        position,
                        length,
                        expired_at: seg.expired_at,
                        created_at: seg.created_at,
                    },
                );
            }

            position += length as u64;
        }
    }

    debug!(entries = index.len(), "rebuilt index from regions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::index::INDEX_SHARD_COUNT;
    use crate::storage::segment::{hash_key, Kind, Segment};
    use tempfile::tempdir;

    const PERM: u32 = 0o755;
    const ONE_MIB: u64 = 1 << 20;

    fn sample_inode(region_id: u64) -> Inode {
        Inode {
            region_id,
            position: 4,
            length: 77,
            expired_at: 0,
            created_at: region_id * 1000,
        }
    }

    #[test]
    fn record_layout_is_48_bytes() {
        assert_eq!(std::mem::size_of::<IndexRecord>(), INDEX_RECORD_SIZE);
    }

    #[test]
    fn export_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.rdb");

        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        for inum in 0..100u64 {
            index.insert(inum, sample_inode(inum + 1));
        }
        export(&index, &path, PERM).unwrap();

        let restored = ShardedIndex::new(INDEX_SHARD_COUNT);
        let installed = load(&path, &restored).unwrap();

        assert_eq!(installed, 100);
        assert_eq!(restored.len(), 100);
        for inum in 0..100u64 {
            assert_eq!(restored.lookup(inum), Some(sample_inode(inum + 1)));
        }
    }

    #[test]
    fn load_rejects_corrupted_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.rdb");

        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        index.insert(1, sample_inode(1));
        index.insert(2, sample_inode(2));
        export(&index, &path, PERM).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let flip = REGION_MAGIC.len() + 10;
        bytes[flip] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let restored = ShardedIndex::new(INDEX_SHARD_COUNT);
        assert!(matches!(
            load(&path, &restored),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn load_rejects_bad_magic_and_partial_records() {
        let dir = tempdir().unwrap();

        let bad_magic = dir.path().join("bad.rdb");
        std::fs::write(&bad_magic, b"XXXXrest").unwrap();
        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        assert!(matches!(
            load(&bad_magic, &index),
            Err(StoreError::UnsupportedMagic(_))
        ));

        let partial = dir.path().join("partial.rdb");
        let mut bytes = REGION_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; INDEX_RECORD_SIZE - 1]);
        std::fs::write(&partial, &bytes).unwrap();
        assert!(matches!(
            load(&partial, &index),
            Err(StoreError::ShortRead(_))
        ));
    }

    #[test]
    fn rebuild_applies_writes_in_region_order() {
        let dir = tempdir().unwrap();
        let mut regions = RegionManager::open(dir.path(), PERM, ONE_MIB).unwrap();

        // Region 1: first version of "a", a key that will be deleted, and
        // one that will expire.
        let a1 = Segment::record(b"a", Kind::Text, b"v1".to_vec(), 1, 0);
        let doomed = Segment::record(b"doomed", Kind::Text, b"x".to_vec(), 2, 0);
        let expired = Segment::record(b"expired", Kind::Text, b"y".to_vec(), 3, 10);
        regions.append(&a1.encode().unwrap()).unwrap();
        regions.append(&doomed.encode().unwrap()).unwrap();
        regions.append(&expired.encode().unwrap()).unwrap();
        regions.rotate().unwrap();

        // Region 2: overwrite of "a" and the tombstone for "doomed".
        let a2 = Segment::record(b"a", Kind::Text, b"v2".to_vec(), 4, 0);
        let tomb = Segment::tombstone(b"doomed", 5);
        let a2_pos = regions.append(&a2.encode().unwrap()).unwrap();
        regions.append(&tomb.encode().unwrap()).unwrap();

        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        rebuild(&regions, &index, 100).unwrap();

        assert_eq!(index.len(), 1);
        let inode = index.lookup(hash_key(b"a")).unwrap();
        assert_eq!(inode.region_id, 2);
        assert_eq!(inode.position, a2_pos);
        assert_eq!(inode.created_at, 4);
        assert!(index.lookup(hash_key(b"doomed")).is_none());
        assert!(index.lookup(hash_key(b"expired")).is_none());
    }

    #[test]
    fn rebuild_discards_a_torn_tail() {
        let dir = tempdir().unwrap();
        let mut regions = RegionManager::open(dir.path(), PERM, ONE_MIB).unwrap();

        let whole = Segment::record(b"whole", Kind::Text, b"kept".to_vec(), 1, 0);
        let torn = Segment::record(b"torn", Kind::Text, b"lost in the crash".to_vec(), 2, 0);
        regions.append(&whole.encode().unwrap()).unwrap();
        let torn_bytes = torn.encode().unwrap();
        regions
            .append(&torn_bytes[..torn_bytes.len() / 2])
            .unwrap();

        let index = ShardedIndex::new(INDEX_SHARD_COUNT);
        rebuild(&regions, &index, 100).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.lookup(hash_key(b"whole")).is_some());
        assert!(index.lookup(hash_key(b"torn")).is_none());
    }
}
