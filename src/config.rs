//! # Store Configuration
//!
//! [`Options`] collects everything the engine consumes at `open` time,
//! with builder-style setters for fluent construction and a `serde`
//! derive so an outer configuration loader can deserialize it directly.
//!
//! | Option              | Default      | Description                                   |
//! |---------------------|--------------|-----------------------------------------------|
//! | `path`              | —            | Data directory; created if missing            |
//! | `fs_perm`           | `0o755`      | POSIX mode for created files and directories  |
//! | `threshold`         | 3 (GiB)      | Region rotation size, 1..=255 GiB             |
//! | `region.enable`     | `true`       | Run the background compactor                  |
//! | `region.second`     | 15000        | Compactor tick period in seconds              |
//! | `region.min_regions`| 5            | Minimum region count before a pass does work  |
//! | `compressor.enable` | `false`      | Snappy-compress value payloads                |
//! | `encryptor.enable`  | `false`      | AES-CBC-encrypt value payloads                |
//! | `encryptor.secret`  | `""`         | AES key; must be 16, 24, or 32 bytes          |
//!
//! The rotation threshold is configured in whole GiB; tests and tuning can
//! override it at byte granularity through [`Options::rotation_threshold_bytes`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Default POSIX permission for created files and directories.
pub const DEFAULT_FS_PERM: u32 = 0o755;

/// Default region rotation threshold in GiB.
pub const DEFAULT_THRESHOLD_GIB: u8 = 3;

/// Default compactor tick period in seconds.
pub const DEFAULT_GC_PERIOD_SECS: u64 = 15_000;

/// Default minimum region count before the compactor does any work.
pub const DEFAULT_GC_MIN_REGIONS: usize = 5;

const GIB: u64 = 1 << 30;

/// Configuration surface consumed by [`Store::open`](crate::Store::open).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Directory holding the regions and the index snapshot.
    pub path: PathBuf,
    /// POSIX permission applied to created files and directories.
    pub fs_perm: u32,
    /// Region rotation size in GiB, 1..=255.
    pub threshold: u8,
    /// Byte-granular override of `threshold`; takes precedence when set.
    #[serde(skip)]
    threshold_bytes: Option<u64>,
    pub region: RegionOptions,
    pub compressor: CompressorOptions,
    pub encryptor: EncryptorOptions,
}

/// Background compactor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionOptions {
    pub enable: bool,
    /// Tick period in seconds.
    pub second: u64,
    /// Minimum number of regions before a pass does any work.
    pub min_regions: usize,
}

/// Snappy compression of value payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorOptions {
    pub enable: bool,
}

/// AES-CBC encryption of value payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptorOptions {
    pub enable: bool,
    /// AES key; 16, 24, or 32 bytes selects AES-128/192/256.
    pub secret: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            fs_perm: DEFAULT_FS_PERM,
            threshold: DEFAULT_THRESHOLD_GIB,
            threshold_bytes: None,
            region: RegionOptions::default(),
            compressor: CompressorOptions::default(),
            encryptor: EncryptorOptions::default(),
        }
    }
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            enable: true,
            second: DEFAULT_GC_PERIOD_SECS,
            min_regions: DEFAULT_GC_MIN_REGIONS,
        }
    }
}

impl Options {
    /// Options for a store rooted at `path`, everything else defaulted.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn fs_perm(mut self, mode: u32) -> Self {
        self.fs_perm = mode;
        self
    }

    /// Sets the region rotation size in whole GiB (1..=255).
    pub fn threshold_gib(mut self, gib: u8) -> Self {
        self.threshold = gib;
        self.threshold_bytes = None;
        self
    }

    /// Sets the region rotation size at byte granularity, overriding
    /// [`Options::threshold_gib`].
    pub fn rotation_threshold_bytes(mut self, bytes: u64) -> Self {
        self.threshold_bytes = Some(bytes);
        self
    }

    /// Enables or disables the background compactor.
    pub fn gc_enabled(mut self, enable: bool) -> Self {
        self.region.enable = enable;
        self
    }

    /// Compactor tick period in seconds.
    pub fn gc_period_secs(mut self, second: u64) -> Self {
        self.region.second = second;
        self
    }

    /// Minimum region count before a compaction pass does any work.
    pub fn gc_min_regions(mut self, min_regions: usize) -> Self {
        self.region.min_regions = min_regions;
        self
    }

    /// Enables Snappy compression of value payloads.
    pub fn compression(mut self, enable: bool) -> Self {
        self.compressor.enable = enable;
        self
    }

    /// Enables AES-CBC encryption of value payloads with the given secret.
    pub fn encryption(mut self, secret: impl Into<String>) -> Self {
        self.encryptor.enable = true;
        self.encryptor.secret = secret.into();
        self
    }

    /// Effective rotation threshold in bytes.
    pub(crate) fn rotation_threshold(&self) -> u64 {
        self.threshold_bytes
            .unwrap_or(self.threshold as u64 * GIB)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Config("data directory path is empty".into()));
        }
        if self.threshold_bytes.is_none() && self.threshold == 0 {
            return Err(StoreError::Config(
                "region threshold must be between 1 and 255 GiB".into(),
            ));
        }
        if self.threshold_bytes == Some(0) {
            return Err(StoreError::Config(
                "region threshold must be at least one byte".into(),
            ));
        }
        if self.region.enable && self.region.second == 0 {
            return Err(StoreError::Config(
                "compactor period must be at least one second".into(),
            ));
        }
        if self.encryptor.enable && !matches!(self.encryptor.secret.len(), 16 | 24 | 32) {
            return Err(StoreError::SecretLength(self.encryptor.secret.len()));
        }
        Ok(())
    }
}
