//! # Region Manager
//!
//! Regions are the append-only data files of the store. Each one starts
//! with a 4-byte magic header followed by a sequence of segments, and is
//! named by its zero-padded decimal id: `00000001.rdb`, `00000002.rdb`, …
//! Exactly one region is *active* (accepting appends); all others are
//! archived and only ever read, until the compactor deletes them.
//!
//! ```text
//! data_dir/
//! ├── 00000001.rdb     # archived
//! ├── 00000002.rdb     # archived
//! ├── 00000003.rdb     # active (append position tracked in memory)
//! └── index.rdb        # index snapshot, written on clean close
//! ```
//!
//! On open, the directory is scanned: every region file must carry the
//! magic header, the largest id becomes the active region (or seeds a new
//! one when it already meets the rotation threshold), and the rest are kept
//! open as shared read handles.
//!
//! All I/O is positional (`read_exact_at` / `write_all_at`), so archived
//! handles can be shared between reader threads with no seek cursor, and
//! reads proceed in parallel with appends. Callers serialize appends and
//! rotation through the engine's write lock; this type itself holds no
//! locks.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Version tag at the start of every region and snapshot file.
pub const REGION_MAGIC: [u8; 4] = [0xDB, 0x00, 0x00, 0x01];

/// Byte offset of the first segment in a region.
pub const REGION_MAGIC_SIZE: u64 = REGION_MAGIC.len() as u64;

/// Extension shared by region files and the index snapshot.
pub const REGION_FILE_EXTENSION: &str = "rdb";

/// File name of the index snapshot inside the data directory.
pub const INDEX_FILE_NAME: &str = "index.rdb";

const REGION_NAME_DIGITS: usize = 8;

/// Open region files plus the append state of the active one.
pub struct RegionManager {
    directory: PathBuf,
    fs_perm: u32,
    threshold: u64,
    active: Arc<File>,
    active_id: u64,
    offset: u64,
    regions: HashMap<u64, Arc<File>>,
}

impl RegionManager {
    /// Opens the data directory, creating it (and region 1) if needed.
    ///
    /// Existing region files are magic-checked and kept open; the largest
    /// id is adopted as the active region unless its size already meets
    /// `threshold`, in which case the next id is created instead.
    pub fn open(directory: &Path, fs_perm: u32, threshold: u64) -> Result<Self> {
        if !directory.exists() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(fs_perm)
                .create(directory)?;
        }

        let mut regions = HashMap::new();
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == INDEX_FILE_NAME || !name.ends_with(REGION_FILE_EXTENSION) {
                continue;
            }

            let region_id = parse_region_file_name(&name)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(entry.path())?;
            validate_magic(&file, &name)?;
            regions.insert(region_id, Arc::new(file));
        }

        let (active, active_id, offset) = match regions.keys().max().copied() {
            None => (create_region_file(directory, fs_perm, 1)?, 1, REGION_MAGIC_SIZE),
            Some(max_id) => {
                let newest = regions[&max_id].clone();
                let size = newest.metadata()?.len();
                if size >= threshold {
                    let next = create_region_file(directory, fs_perm, max_id + 1)?;
                    (next, max_id + 1, REGION_MAGIC_SIZE)
                } else {
                    regions.remove(&max_id);
                    (newest, max_id, size)
                }
            }
        };

        debug!(
            directory = %directory.display(),
            active_id,
            archived = regions.len(),
            "opened region directory"
        );

        Ok(RegionManager {
            directory: directory.to_path_buf(),
            fs_perm,
            threshold,
            active,
            active_id,
            offset,
            regions,
        })
    }

    /// Appends `bytes` at the current offset of the active region and
    /// returns the position they were written at. The caller holds the
    /// engine write lock.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let position = self.offset;
        self.active.write_all_at(bytes, position)?;
        self.offset += bytes.len() as u64;
        Ok(position)
    }

    /// Whether the active region has reached the rotation threshold.
    pub fn should_rotate(&self) -> bool {
        self.offset >= self.threshold
    }

    /// Archives the active region and starts the next id.
    pub fn rotate(&mut self) -> Result<()> {
        self.active.sync_all()?;
        self.regions.insert(self.active_id, self.active.clone());

        let next_id = self.active_id + 1;
        self.active = create_region_file(&self.directory, self.fs_perm, next_id)?;
        self.active_id = next_id;
        self.offset = REGION_MAGIC_SIZE;
        debug!(region_id = next_id, "rotated to new active region");
        Ok(())
    }

    /// Shared handle for a region, active or archived.
    pub fn handle(&self, region_id: u64) -> Option<Arc<File>> {
        if region_id == self.active_id {
            Some(self.active.clone())
        } else {
            self.regions.get(&region_id).cloned()
        }
    }

    pub fn active_id(&self) -> u64 {
        self.active_id
    }

    /// Current append offset of the active region.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of regions on disk, including the active one.
    pub fn region_count(&self) -> usize {
        self.regions.len() + 1
    }

    /// Every region id in ascending order, active last.
    pub fn ids_ascending(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.regions.keys().copied().collect();
        ids.push(self.active_id);
        ids.sort_unstable();
        ids
    }

    /// Drops an archived region and deletes its file. Open handles held by
    /// in-flight readers stay valid until dropped.
    pub fn remove_region(&mut self, region_id: u64) -> Result<()> {
        if region_id == self.active_id {
            return Err(StoreError::Corrupt(format!(
                "refusing to remove the active region {region_id}"
            )));
        }
        self.regions.remove(&region_id);
        fs::remove_file(self.directory.join(format_region_file_name(region_id)))?;
        Ok(())
    }

    /// Flushes the active region to disk. Called on close; archived regions
    /// were synced when they rotated out.
    pub fn sync(&self) -> Result<()> {
        self.active.sync_all()?;
        Ok(())
    }
}

fn create_region_file(directory: &Path, fs_perm: u32, region_id: u64) -> Result<Arc<File>> {
    let path = directory.join(format_region_file_name(region_id));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .mode(fs_perm)
        .open(&path)?;
    file.write_all_at(&REGION_MAGIC, 0)?;
    Ok(Arc::new(file))
}

/// Formats a region id as its file name, e.g. `1 -> "00000001.rdb"`.
pub fn format_region_file_name(region_id: u64) -> String {
    format!("{region_id:0width$}.{REGION_FILE_EXTENSION}", width = REGION_NAME_DIGITS)
}

/// Parses a region file name back into its id, validating the zero-padded
/// 8-digit scheme.
pub fn parse_region_file_name(name: &str) -> Result<u64> {
    let invalid = || StoreError::InvalidFileName(name.to_string());

    let stem = name
        .strip_suffix(REGION_FILE_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
        .ok_or_else(invalid)?;

    if stem.len() != REGION_NAME_DIGITS
        || !stem.starts_with('0')
        || !stem.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let region_id: u64 = stem.parse().map_err(|_| invalid())?;
    if region_id == 0 {
        return Err(invalid());
    }
    Ok(region_id)
}

fn validate_magic(file: &File, name: &str) -> Result<()> {
    let mut header = [0u8; REGION_MAGIC.len()];
    file.read_exact_at(&mut header, 0)
        .map_err(|_| StoreError::UnsupportedMagic(name.to_string()))?;
    if header != REGION_MAGIC {
        return Err(StoreError::UnsupportedMagic(name.to_string()));
    }
    Ok(())
}
