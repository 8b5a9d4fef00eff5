//! Engine Module
//!
//! The public handle over one data directory.
//!
//! ## Responsibilities
//! - Open: lock the directory, fold merge output, rebuild the index
//! - Route every key to its index shard through the hash ring
//! - Append records to the active segment and rotate it when full
//! - Hand out write batches and ordered iterators
//! - Run merge and the background worker
//!
//! ## Layout
//! ```text
//!            Engine (Arc<Core> + worker)
//!                       │
//!        ┌──────────────┼───────────────┐
//!        ▼              ▼               ▼
//!   SegmentSet      HashRing       Indexer × N
//!  (RwLock: active   route(key)    (BTree | ART |
//!   + sealed)        → shard        sled B+tree)
//! ```

mod background;
mod merge;
mod recovery;
mod state;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::batch::WriteBatch;
use crate::config::{Config, IndexType, IteratorOptions, WriteBatchOptions};
use crate::data::{encode_log_record, log_record_key_with_seq, LogRecord, NON_TXN_SEQ};
use crate::error::{CaskError, Result};
use crate::iterator::DbIterator;
use crate::util::copy_dir;

use self::background::BackgroundWorker;
pub(crate) use self::state::Core;
use self::state::FILE_LOCK_NAME;

/// Snapshot of engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Live keys across all shards
    pub key_num: usize,
    /// Segment files, active included
    pub data_file_num: usize,
    /// Bytes merge could reclaim
    pub reclaimable_size: u64,
    /// Bytes used by the data directory
    pub disk_size: u64,
}

/// The storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (put/delete/batch commit): serialized by the segment-set
///   write lock, which covers append, rotation and the index update
/// - **Reads** (get/iterator values): segment-set read lock plus the shard's
///   own lock, so reads run in parallel with each other
/// - **Merge**: holds the write lock only to seal the active segment and,
///   when reloading, to swap the merged segments in
pub struct Engine {
    core: Arc<Core>,
    worker: Mutex<Option<BackgroundWorker>>,
}

impl Engine {
    /// Open or create a database
    pub fn open(config: Config) -> Result<Self> {
        let core = Arc::new(Core::open(config)?);
        let worker = BackgroundWorker::spawn(Arc::clone(&core))?;
        Ok(Self {
            core,
            worker: Mutex::new(worker),
        })
    }

    /// Open with default settings in `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().dir_path(path.as_ref()).build())
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    // =========================================================================
    // Key-value operations
    // =========================================================================

    /// Store a value, replacing any previous one
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }
        let record = LogRecord::normal(log_record_key_with_seq(key, NON_TXN_SEQ), value.to_vec());
        let (buf, _) = encode_log_record(&record);

        let mut files = self.core.files.write();
        let pos = self.core.append_log_record(&mut files, &buf)?;
        if let Some(old) = self.core.index_for(key).put(key.to_vec(), pos)? {
            self.core.add_reclaim(old.size as u64);
        }
        Ok(())
    }

    /// Fetch a value; `KeyNotFound` when absent
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.core.get(key)
    }

    /// Remove a key. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }

        let record = LogRecord::deleted(log_record_key_with_seq(key, NON_TXN_SEQ));
        let (buf, _) = encode_log_record(&record);

        let mut files = self.core.files.write();
        let index = self.core.index_for(key);
        if index.get(key)?.is_none() {
            return Ok(());
        }

        let pos = self.core.append_log_record(&mut files, &buf)?;
        self.core.add_reclaim(pos.size as u64);

        let old = index.delete(key)?.ok_or_else(|| {
            CaskError::IndexUpdateFailed("key vanished from index during delete".to_string())
        })?;
        self.core.add_reclaim(old.size as u64);
        Ok(())
    }

    // =========================================================================
    // Batches and iteration
    // =========================================================================

    /// Start a write batch
    ///
    /// With the durable index this requires the sequence checkpoint written by
    /// the previous close, unless the directory was created by this open.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.core.config.index_type == IndexType::BPlusTree
            && !self.core.seq_file_exists
            && !self.core.is_initial
        {
            return Err(CaskError::BatchUnavailable);
        }
        Ok(WriteBatch::new(&self.core, options))
    }

    /// Ordered iterator over all shards
    pub fn iter(&self, options: IteratorOptions) -> Result<DbIterator<'_>> {
        DbIterator::new(&self.core, options)
    }

    /// Every key matching `options`, in iteration order
    pub fn list_keys(&self, options: IteratorOptions) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.iter(options)?;
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        iter.close();
        Ok(keys)
    }

    /// Visit key-value pairs in order until `f` returns `false`
    pub fn fold<F>(&self, options: IteratorOptions, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut iter = self.iter(options)?;
        while iter.valid() {
            let value = iter.value()?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        iter.close();
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Compact sealed segments. With `reload`, the result replaces them
    /// immediately; otherwise it is picked up by the next open.
    pub fn merge(&self, reload: bool) -> Result<()> {
        self.core.merge(reload)
    }

    /// Flush the active segment to disk
    pub fn sync(&self) -> Result<()> {
        self.core.sync()
    }

    pub fn stat(&self) -> Result<Stat> {
        self.core.stat()
    }

    /// Copy the data directory to `dest`, without the process lock
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<()> {
        let files = self.core.files.read();
        files.active.sync()?;
        for index in &self.core.indexes {
            index.flush()?;
        }
        copy_dir(&self.core.config.dir_path, dest.as_ref(), &[FILE_LOCK_NAME])?;
        debug!(dest = %dest.as_ref().display(), "backup written");
        Ok(())
    }

    /// Stop the worker, flush and release the directory
    pub fn close(&self) -> Result<()> {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
        self.core.close()
    }

    /// Last allocated batch sequence number
    pub fn seq_no(&self) -> u64 {
        self.core.seq_no.load(Ordering::SeqCst)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close database");
        }
    }
}
