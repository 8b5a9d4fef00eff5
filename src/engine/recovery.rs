//! Startup recovery
//!
//! ```text
//! hint-index ──► index  (segments below the merge boundary)
//!                  ▲
//! NNN.data ────────┘    (replay from offset 0, boundary and above)
//!
//! replay:  seq == 0        → apply now
//!          seq == n        → buffer[n].push(...)
//!          TxnFinished(n)  → apply buffer[n]
//!          end of segments → drop leftovers (uncommitted batch)
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::data::{
    decode_record_pos, parse_data_file_id, parse_log_record_key, DataFile, LogRecordType,
    RecordPos, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, NON_TXN_SEQ, SEQ_NO_FILE_NAME,
};
use crate::error::{CaskError, Result};
use crate::fio::IoType;

use super::merge::read_non_merge_file_id;
use super::state::{Core, SegmentSet};

/// Replayed record waiting for its batch marker
struct PendingRecord {
    key: Vec<u8>,
    rec_type: LogRecordType,
    pos: RecordPos,
}

/// Open every segment in `dir`, ascending by id; the highest one is active
///
/// Returns the sorted ids found on disk along with the opened set. An empty
/// directory gets a fresh segment 0.
pub(crate) fn load_data_files(dir: &Path, use_mmap: bool) -> Result<(Vec<u32>, SegmentSet)> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(crate::data::DATA_FILE_SUFFIX) {
            continue;
        }
        let id = parse_data_file_id(name)
            .ok_or_else(|| CaskError::DataDirCorrupted(format!("bad segment name {}", name)))?;
        file_ids.push(id);
    }
    file_ids.sort_unstable();

    let io_type = if use_mmap {
        IoType::MemoryMap
    } else {
        IoType::Standard
    };

    let mut older = HashMap::new();
    let mut active = None;
    for (i, &id) in file_ids.iter().enumerate() {
        let file = DataFile::open(dir, id, io_type)?;
        if i == file_ids.len() - 1 {
            active = Some(file);
        } else {
            older.insert(id, file);
        }
    }

    let active = match active {
        Some(file) => file,
        None => DataFile::open(dir, 0, IoType::Standard)?,
    };
    Ok((file_ids, SegmentSet { active, older }))
}

impl Core {
    /// Load positions for merged segments from the hint log
    ///
    /// Returns the first segment id the merge did not cover, or 0 when the
    /// directory has never been merged.
    pub(crate) fn load_index_from_hint_file(&self) -> Result<u32> {
        let dir = &self.config.dir_path;
        if !dir.join(MERGE_FINISHED_FILE_NAME).exists() {
            return Ok(0);
        }
        let non_merge_id = read_non_merge_file_id(dir)?;

        if !dir.join(HINT_FILE_NAME).exists() {
            return Ok(non_merge_id);
        }

        let mut loaded = 0usize;
        self.for_each_hint(|key, pos| {
            self.index_for(&key).put(key, pos)?;
            loaded += 1;
            Ok(())
        })?;
        debug!(entries = loaded, non_merge_id, "loaded index from hint log");
        Ok(non_merge_id)
    }

    /// Point keys that still reference retired segments at their merged copy
    ///
    /// Used when the index outlives the segments it refers to: a durable index
    /// at open, or any index after an in-place merge reload.
    pub(crate) fn remap_index_from_hint(&self, non_merge_id: u32) -> Result<()> {
        if !self.config.dir_path.join(HINT_FILE_NAME).exists() {
            return Ok(());
        }

        let mut remapped = 0usize;
        self.for_each_hint(|key, pos| {
            let index = self.index_for(&key);
            if let Some(current) = index.get(&key)? {
                if current.file_id < non_merge_id {
                    index.put(key, pos)?;
                    remapped += 1;
                }
            }
            Ok(())
        })?;
        debug!(entries = remapped, non_merge_id, "remapped index from hint log");
        Ok(())
    }

    fn for_each_hint(&self, mut f: impl FnMut(Vec<u8>, RecordPos) -> Result<()>) -> Result<()> {
        let hint_file = DataFile::open_hint_file(&self.config.dir_path)?;
        let mut offset = 0;
        loop {
            let (record, size) = match hint_file.read_log_record(offset) {
                Ok(read) => read,
                Err(CaskError::EndOfLog) => break,
                Err(e) => return Err(e),
            };
            f(record.key, decode_record_pos(&record.value)?)?;
            offset += size;
        }
        Ok(())
    }

    /// Replay segments with id `>= non_merge_id` into the index
    pub(crate) fn load_index_from_data_files(
        &self,
        file_ids: &[u32],
        non_merge_id: u32,
    ) -> Result<()> {
        let mut files = self.files.write();
        let active_id = files.active.file_id();

        let mut pending: HashMap<u64, Vec<PendingRecord>> = HashMap::new();
        let mut max_seq = NON_TXN_SEQ;

        for &file_id in file_ids.iter().filter(|&&id| id >= non_merge_id) {
            let is_active = file_id == active_id;
            let file = files
                .get(file_id)
                .ok_or(CaskError::DataFileNotFound(file_id))?;

            let mut offset = 0u64;
            loop {
                let (record, size) = match file.read_log_record(offset) {
                    Ok(read) => read,
                    Err(CaskError::EndOfLog) => break,
                    Err(CaskError::CorruptRecord(msg)) if is_active => {
                        warn!(file_id, offset, %msg, "corrupt record at tail of active segment");
                        break;
                    }
                    Err(e) => return Err(e),
                };

                let pos = RecordPos {
                    file_id,
                    offset,
                    size: size as u32,
                };
                let (key, seq) = parse_log_record_key(&record.key)?;

                if seq == NON_TXN_SEQ {
                    self.apply_to_index(key, record.rec_type, pos)?;
                } else if record.rec_type == LogRecordType::TxnFinished {
                    for staged in pending.remove(&seq).unwrap_or_default() {
                        self.apply_to_index(staged.key, staged.rec_type, staged.pos)?;
                    }
                    self.add_reclaim(size);
                } else {
                    pending.entry(seq).or_default().push(PendingRecord {
                        key,
                        rec_type: record.rec_type,
                        pos,
                    });
                }
                max_seq = max_seq.max(seq);
                offset += size;
            }

            let file_size = file.size()?;
            if offset < file_size {
                if !is_active {
                    return Err(CaskError::CorruptRecord(format!(
                        "segment {} ends with {} unreadable bytes",
                        file_id,
                        file_size - offset
                    )));
                }
                warn!(
                    file_id,
                    valid = offset,
                    file_size,
                    "truncating torn tail of active segment"
                );
                files.active.truncate(offset)?;
            }
        }

        // Batches that never reached their marker stay invisible
        for (seq, records) in pending {
            debug!(seq, records = records.len(), "discarding uncommitted batch");
            for staged in records {
                self.add_reclaim(staged.pos.size as u64);
            }
        }

        self.seq_no.store(max_seq, Ordering::SeqCst);
        Ok(())
    }

    /// Cut a torn tail off the active segment without touching the index
    ///
    /// Durable indexes skip replay, so this is their only tail repair.
    pub(crate) fn truncate_active_tail(&self) -> Result<()> {
        let mut files = self.files.write();
        let file_id = files.active.file_id();
        let mut offset = 0u64;
        loop {
            match files.active.read_log_record(offset) {
                Ok((_, size)) => offset += size,
                Err(CaskError::EndOfLog) => break,
                Err(CaskError::CorruptRecord(msg)) => {
                    warn!(file_id, offset, %msg, "corrupt record at tail of active segment");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let file_size = files.active.size()?;
        if offset < file_size {
            warn!(
                file_id,
                valid = offset,
                file_size,
                "truncating torn tail of active segment"
            );
            files.active.truncate(offset)?;
        }
        Ok(())
    }

    /// Read and remove the sequence checkpoint left by the last close
    pub(crate) fn load_seq_no(&mut self) -> Result<()> {
        let path = self.config.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }

        let seq_file = DataFile::open_seq_no_file(&self.config.dir_path)?;
        let (record, _) = seq_file.read_log_record(0)?;
        let seq = std::str::from_utf8(&record.value)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| CaskError::DataDirCorrupted("unreadable seq-no file".to_string()))?;
        drop(seq_file);
        fs::remove_file(&path)?;

        self.seq_no.store(seq, Ordering::SeqCst);
        self.seq_file_exists = true;
        Ok(())
    }
}
