//! Write batches
//!
//! A batch stages puts and deletes in memory and commits them as one atomic
//! group:
//!
//! ```text
//! [seq|k1] [seq|k2] ... [seq|kN] [seq|txn-fin]
//!  └────── staged records ─────┘  └─ marker ─┘
//! ```
//!
//! Recovery only applies records whose marker made it to disk, so a crash
//! mid-commit leaves none of the batch visible.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::WriteBatchOptions;
use crate::data::{
    encode_log_record, log_record_key_with_seq, LogRecord, LogRecordType, TXN_FIN_KEY,
};
use crate::engine::Core;
use crate::error::{CaskError, Result};

/// Staged writes against one engine
///
/// The staging map is keyed by user key, so the last write to a key wins.
/// Commits of one batch are serialized by its own lock; separate batches
/// commit independently, each under its own sequence number.
pub struct WriteBatch<'a> {
    core: &'a Core,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(core: &'a Core, options: WriteBatchOptions) -> Self {
        Self {
            core,
            options,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stage a value for `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }
        self.pending
            .lock()
            .insert(key.to_vec(), LogRecord::normal(key.to_vec(), value.to_vec()));
        Ok(())
    }

    /// Stage a delete for `key`
    ///
    /// When the key is not committed, only a staged put (if any) is dropped.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if self.core.index_for(key).get(key)?.is_none() {
            pending.remove(key);
            return Ok(());
        }
        pending.insert(key.to_vec(), LogRecord::deleted(key.to_vec()));
        Ok(())
    }

    /// Read through the batch: staged writes first, then committed state
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }
        if let Some(record) = self.pending.lock().get(key) {
            return match record.rec_type {
                LogRecordType::Deleted => Err(CaskError::KeyNotFound),
                _ => Ok(record.value.clone()),
            };
        }
        self.core.get(key)
    }

    /// Number of staged keys
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Write every staged record plus the commit marker, then publish them
    /// to the index
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(CaskError::ExceedMaxBatchNum(self.options.max_batch_num));
        }

        // Step 1: Encode staged records tagged with the batch sequence, then
        // the marker
        let seq = self.core.seq_no.fetch_add(1, Ordering::SeqCst) + 1;
        let mut encoded = Vec::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let stored = LogRecord {
                key: log_record_key_with_seq(key, seq),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            encoded.push((key.clone(), record.rec_type, encode_log_record(&stored).0));
        }
        let marker = LogRecord {
            key: log_record_key_with_seq(TXN_FIN_KEY, seq),
            value: Vec::new(),
            rec_type: LogRecordType::TxnFinished,
        };
        let (marker_buf, _) = encode_log_record(&marker);

        // Step 2: Append under the write lock; the marker is the commit point
        let mut files = self.core.files.write();
        let mut positions = Vec::with_capacity(encoded.len());
        for (key, rec_type, buf) in encoded {
            let pos = self.core.append_log_record(&mut files, &buf)?;
            positions.push((key, rec_type, pos));
        }
        let marker_pos = self.core.append_log_record(&mut files, &marker_buf)?;
        if self.options.sync_writes {
            files.active.sync()?;
        }

        // Step 3: Publish
        for (key, rec_type, pos) in positions {
            self.core.apply_to_index(key, rec_type, pos)?;
        }
        if self.options.sync_writes {
            for index in &self.core.indexes {
                index.flush()?;
            }
        }
        self.core.add_reclaim(marker_pos.size as u64);

        debug!(seq, records = pending.len(), "batch committed");
        pending.clear();
        Ok(())
    }
}
