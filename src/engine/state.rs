//! Engine state shared by the public handle, batches, iterators, merge and
//! the background worker.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fs2::FileExt;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{Config, IndexType};
use crate::data::{encode_log_record, DataFile, LogRecord, LogRecordType, RecordPos, SEQ_NO_KEY};
use crate::error::{CaskError, Result};
use crate::fio::IoType;
use crate::index::{new_indexers, HashRing, Indexer};
use crate::util::dir_size;

use super::Stat;

/// Process lock inside the data directory
pub(crate) const FILE_LOCK_NAME: &str = "flock";

// =============================================================================
// Segment Set
// =============================================================================

/// The writable segment plus every sealed one
pub(crate) struct SegmentSet {
    pub(crate) active: DataFile,
    pub(crate) older: HashMap<u32, DataFile>,
}

impl SegmentSet {
    pub(crate) fn get(&self, file_id: u32) -> Option<&DataFile> {
        if self.active.file_id() == file_id {
            Some(&self.active)
        } else {
            self.older.get(&file_id)
        }
    }

    pub(crate) fn file_count(&self) -> usize {
        self.older.len() + 1
    }

    /// Sealed ids in ascending order
    pub(crate) fn older_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.older.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

// =============================================================================
// Core
// =============================================================================

/// One open database directory
///
/// ## Lock order:
/// engine `files` lock first, then the shard index lock. Put, delete and
/// batch commit hold the `files` write lock across append and index update,
/// so a reader holding the read lock never sees a position that points into
/// a segment merge has already retired.
pub(crate) struct Core {
    pub(crate) config: Config,
    pub(crate) files: RwLock<SegmentSet>,
    pub(crate) indexes: Vec<Box<dyn Indexer>>,
    pub(crate) ring: HashRing,

    /// Last allocated batch sequence number
    pub(crate) seq_no: AtomicU64,
    /// Bytes held by superseded records
    pub(crate) reclaim_size: AtomicU64,
    /// Bytes appended since the last sync
    pub(crate) bytes_since_sync: AtomicU64,
    pub(crate) is_merging: AtomicBool,

    /// A `seq-no` checkpoint was found at open
    pub(crate) seq_file_exists: bool,
    /// The directory held no data when opened
    pub(crate) is_initial: bool,

    closed: AtomicBool,
    lock_file: File,
}

impl Core {
    /// Open a directory: lock it, fold finished merge output, load segments
    /// and build the index.
    pub(crate) fn open(config: Config) -> Result<Self> {
        // Step 1: Validate and create the directory
        config.validate()?;
        let dir = config.dir_path.clone();
        let is_initial = match fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        };
        fs::create_dir_all(&dir)?;

        // Step 2: Take the process lock without blocking
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(FILE_LOCK_NAME))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| CaskError::DatabaseInUse)?;

        // Step 3: Build the index shards
        let indexes = new_indexers(
            config.index_type,
            &dir,
            config.index_shards,
            config.sync_writes,
        )?;
        let ring = HashRing::new(config.index_shards);

        // Step 4: Fold a completed merge before any segment is read
        let folded = super::merge::fold_merge_dir(&dir)?;

        // Step 5: Open segments, oldest first
        let (file_ids, files) = super::recovery::load_data_files(&dir, config.mmap_at_startup)?;

        let mut core = Self {
            config,
            files: RwLock::new(files),
            indexes,
            ring,
            seq_no: AtomicU64::new(0),
            reclaim_size: AtomicU64::new(0),
            bytes_since_sync: AtomicU64::new(0),
            is_merging: AtomicBool::new(false),
            seq_file_exists: false,
            is_initial,
            closed: AtomicBool::new(false),
            lock_file,
        };

        // Step 6: Rebuild (or repair) the index
        if core.config.index_type == IndexType::BPlusTree {
            if let Some(non_merge_id) = folded {
                core.remap_index_from_hint(non_merge_id)?;
            }
            core.truncate_active_tail()?;
            core.load_seq_no()?;
        } else {
            let non_merge_id = core.load_index_from_hint_file()?;
            core.load_index_from_data_files(&file_ids, non_merge_id)?;
        }

        // Step 7: Startup mmap is read-only; go back to standard I/O
        if core.config.mmap_at_startup {
            let mut files = core.files.write();
            files.active.set_io_manager(IoType::Standard)?;
            for file in files.older.values_mut() {
                file.set_io_manager(IoType::Standard)?;
            }
        }

        info!(
            dir = %core.config.dir_path.display(),
            files = file_ids.len(),
            keys = core.key_count()?,
            "database opened"
        );
        Ok(core)
    }

    // =========================================================================
    // Index helpers
    // =========================================================================

    /// Index shard owning `key`
    pub(crate) fn index_for(&self, key: &[u8]) -> &dyn Indexer {
        self.indexes[self.ring.route(key)].as_ref()
    }

    pub(crate) fn key_count(&self) -> Result<usize> {
        let mut total = 0;
        for index in &self.indexes {
            total += index.size()?;
        }
        Ok(total)
    }

    pub(crate) fn add_reclaim(&self, bytes: u64) {
        self.reclaim_size.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Apply one replayed or committed record to its shard
    pub(crate) fn apply_to_index(
        &self,
        key: Vec<u8>,
        rec_type: LogRecordType,
        pos: RecordPos,
    ) -> Result<()> {
        let index = self.index_for(&key);
        match rec_type {
            LogRecordType::Normal => {
                if let Some(old) = index.put(key, pos)? {
                    self.add_reclaim(old.size as u64);
                }
            }
            LogRecordType::Deleted => {
                self.add_reclaim(pos.size as u64);
                if let Some(old) = index.delete(&key)? {
                    self.add_reclaim(old.size as u64);
                }
            }
            LogRecordType::TxnFinished => {
                return Err(CaskError::IndexUpdateFailed(
                    "commit marker cannot be indexed".to_string(),
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Append an encoded record to the active segment, rotating first when
    /// it would overflow. Caller holds the `files` write lock.
    pub(crate) fn append_log_record(
        &self,
        files: &mut SegmentSet,
        buf: &[u8],
    ) -> Result<RecordPos> {
        let size = buf.len() as u64;

        let write_off = files.active.write_off();
        if write_off > 0 && write_off + size > self.config.data_file_size {
            self.rotate(files)?;
        }

        let offset = files.active.write_off();
        files.active.write(buf)?;

        let unsynced = self.bytes_since_sync.fetch_add(size, Ordering::SeqCst) + size;
        let need_sync = self.config.sync_writes
            || (self.config.bytes_per_sync > 0 && unsynced >= self.config.bytes_per_sync);
        if need_sync {
            files.active.sync()?;
            self.bytes_since_sync.store(0, Ordering::SeqCst);
        }

        Ok(RecordPos {
            file_id: files.active.file_id(),
            offset,
            size: size as u32,
        })
    }

    /// Seal the active segment and open the next one
    pub(crate) fn rotate(&self, files: &mut SegmentSet) -> Result<()> {
        files.active.sync()?;
        self.bytes_since_sync.store(0, Ordering::SeqCst);

        let next_id = files.active.file_id() + 1;
        let next = DataFile::open(&self.config.dir_path, next_id, IoType::Standard)?;
        let sealed = std::mem::replace(&mut files.active, next);
        debug!(sealed = sealed.file_id(), active = next_id, "rotated segment");
        files.older.insert(sealed.file_id(), sealed);
        Ok(())
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Read the value stored at `pos`. Caller holds the `files` read lock.
    pub(crate) fn value_at(&self, files: &SegmentSet, pos: RecordPos) -> Result<Vec<u8>> {
        let file = files
            .get(pos.file_id)
            .ok_or(CaskError::DataFileNotFound(pos.file_id))?;
        let (record, _) = file.read_log_record(pos.offset)?;
        if record.rec_type == LogRecordType::Deleted {
            return Err(CaskError::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Look up a committed key
    pub(crate) fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }
        let files = self.files.read();
        let pos = self.index_for(key).get(key)?.ok_or(CaskError::KeyNotFound)?;
        self.value_at(&files, pos)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub(crate) fn sync(&self) -> Result<()> {
        let files = self.files.read();
        files.active.sync()?;
        self.bytes_since_sync.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn stat(&self) -> Result<Stat> {
        let data_file_num = self.files.read().file_count();
        Ok(Stat {
            key_num: self.key_count()?,
            data_file_num,
            reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size: dir_size(&self.config.dir_path)?,
        })
    }

    /// Reclaimable bytes over total directory size
    pub(crate) fn reclaim_ratio(&self) -> Result<f32> {
        let total = dir_size(&self.config.dir_path)?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(self.reclaim_size.load(Ordering::SeqCst) as f32 / total as f32)
    }

    /// Flush everything and release the directory. Safe to call twice.
    pub(crate) fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let files = self.files.read();
            files.active.sync()?;
        }

        if self.config.index_type == IndexType::BPlusTree {
            let mut seq_file = DataFile::open_seq_no_file(&self.config.dir_path)?;
            let seq = self.seq_no.load(Ordering::SeqCst);
            let record = LogRecord::normal(SEQ_NO_KEY.to_vec(), seq.to_string().into_bytes());
            let (buf, _) = encode_log_record(&record);
            seq_file.write(&buf)?;
            seq_file.sync()?;
        }

        for index in &self.indexes {
            index.close()?;
        }

        self.lock_file.unlock()?;
        info!(dir = %self.config.dir_path.display(), "database closed");
        Ok(())
    }
}
