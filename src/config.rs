//! Configuration for ShardCask
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CaskError, Result};

/// Main configuration for a ShardCask instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {dir_path}/
    ///     ├── 000000000.data   (segment files)
    ///     ├── hint-index       (key → position pairs written by merge)
    ///     ├── merge-finished   (id of the first segment not covered by merge)
    ///     ├── seq-no           (last sequence number, durable index only)
    ///     ├── bptree-index/    (durable index, BPlusTree only)
    ///     └── flock            (process lock)
    pub dir_path: PathBuf,

    /// Size threshold of the active segment before rotating (in bytes)
    pub data_file_size: u64,

    /// Use memory-mapped reads while rebuilding the index at startup
    pub mmap_at_startup: bool,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// fsync after every write (safest, slowest)
    pub sync_writes: bool,

    /// fsync once this many bytes were written since the last sync (0 = off)
    pub bytes_per_sync: u64,

    /// fsync periodically from the background worker
    pub sync_interval: Option<Duration>,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Which index backend each shard uses
    pub index_type: IndexType,

    /// Number of index shards behind the hash ring (fixed per directory)
    pub index_shards: usize,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Reclaimable / total bytes ratio at which merge is allowed
    pub merge_ratio: f32,

    /// How often the background worker checks the merge ratio
    pub merge_check_interval: Option<Duration>,
}

/// Index backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// In-memory ordered B-tree
    BTree,

    /// In-memory adaptive radix tree
    Art,

    /// Disk-resident B+tree (survives restarts without replay)
    BPlusTree,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("shardcask"),
            data_file_size: 256 * 1024 * 1024, // 256 MB
            mmap_at_startup: true,
            sync_writes: false,
            bytes_per_sync: 0,
            sync_interval: None,
            index_type: IndexType::BTree,
            index_shards: 4,
            merge_ratio: 0.5,
            merge_check_interval: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(CaskError::Config("dir_path is empty".to_string()));
        }
        if self.data_file_size == 0 {
            return Err(CaskError::Config(
                "data_file_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(CaskError::Config(format!(
                "merge_ratio must be within [0, 1], got {}",
                self.merge_ratio
            )));
        }
        if self.index_shards == 0 {
            return Err(CaskError::Config(
                "index_shards must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dir_path = path.into();
        self
    }

    /// Set the segment size threshold (in bytes)
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.config.data_file_size = size;
        self
    }

    /// Enable or disable mmap reads during startup
    pub fn mmap_at_startup(mut self, enabled: bool) -> Self {
        self.config.mmap_at_startup = enabled;
        self
    }

    /// Sync after every write
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.config.sync_writes = enabled;
        self
    }

    /// Sync after this many bytes (0 disables)
    pub fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.config.bytes_per_sync = bytes;
        self
    }

    /// Sync periodically from the background worker
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = Some(interval);
        self
    }

    /// Set the index backend
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.config.index_type = index_type;
        self
    }

    /// Set the number of index shards
    pub fn index_shards(mut self, shards: usize) -> Self {
        self.config.index_shards = shards;
        self
    }

    /// Set the merge threshold ratio
    pub fn merge_ratio(mut self, ratio: f32) -> Self {
        self.config.merge_ratio = ratio;
        self
    }

    /// Check the merge threshold periodically from the background worker
    pub fn merge_check_interval(mut self, interval: Duration) -> Self {
        self.config.merge_check_interval = Some(interval);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Per-call Options
// =============================================================================

/// Options for iterators, `list_keys` and `fold`
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix (empty = all keys)
    pub prefix: Vec<u8>,

    /// Iterate in descending key order
    pub reverse: bool,
}

impl IteratorOptions {
    /// Iterate keys with the given prefix
    pub fn with_prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            reverse: false,
        }
    }

    /// Iterate all keys in descending order
    pub fn reversed() -> Self {
        Self {
            prefix: Vec::new(),
            reverse: true,
        }
    }
}

/// Options for write batches
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Maximum number of staged keys per commit
    pub max_batch_num: usize,

    /// Sync the active segment once the commit marker is written
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}
