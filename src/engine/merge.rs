//! Merge (compaction)
//!
//! ```text
//!  under write lock         outside the lock                    reload (optional)
//! ┌──────────────────┐   ┌────────────────────────────────┐   ┌──────────────────────┐
//! │ checks           │   │ for each sealed record:        │   │ drop retired handles │
//! │ seal active      │──►│   live? → rewrite into         │──►│ fold <dir>-merge     │
//! │ non_merge = new  │   │           <dir>-merge + hint   │   │ remap index via hint │
//! │ active id        │   │ sync, write merge-finished     │   └──────────────────────┘
//! └──────────────────┘   └────────────────────────────────┘
//! ```
//!
//! Without reload the merge output sits in `<dir>-merge` and is folded in by
//! the next open.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::config::{Config, IndexType};
use crate::data::{
    encode_log_record, log_record_key_with_seq, parse_data_file_id, parse_log_record_key,
    DataFile, LogRecord, LogRecordType, MERGE_FINISHED_FILE_NAME, MERGE_FINISHED_KEY,
    NON_TXN_SEQ, SEQ_NO_FILE_NAME,
};
use crate::error::{CaskError, Result};
use crate::fio::IoType;
use crate::util::{available_disk_size, dir_size};

use super::state::{Core, FILE_LOCK_NAME};

const MERGE_DIR_SUFFIX: &str = "-merge";

/// Written into the merge directory once the retired segments are gone
const FOLD_STARTED_FILE_NAME: &str = "merge-folding";

/// Sibling directory merge writes into: `/tmp/db` → `/tmp/db-merge`
pub(crate) fn merge_dir_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let merge_name = format!("{}{}", name, MERGE_DIR_SUFFIX);
    match dir.parent() {
        Some(parent) => parent.join(merge_name),
        None => PathBuf::from(merge_name),
    }
}

/// Read the boundary id stored in `dir/merge-finished`
pub(crate) fn read_non_merge_file_id(dir: &Path) -> Result<u32> {
    let file = DataFile::open_merge_finished_file(dir)?;
    let (record, _) = file.read_log_record(0)?;
    std::str::from_utf8(&record.value)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| CaskError::DataDirCorrupted("unreadable merge-finished file".to_string()))
}

/// Move completed merge output from `<dir>-merge` into `dir`
///
/// Segments below the recorded boundary are deleted first. An unfinished
/// merge directory is discarded. Returns the boundary when something was
/// folded in.
///
/// A fold cut short is finished by the next call: `merge-finished` moves
/// last, and once retirement is done a `merge-folding` marker keeps a rerun
/// from deleting merged segments that already moved.
pub(crate) fn fold_merge_dir(dir: &Path) -> Result<Option<u32>> {
    let merge_path = merge_dir_path(dir);
    if !merge_path.is_dir() {
        return Ok(None);
    }

    let mut names = Vec::new();
    let mut finished = false;
    let mut retired_done = false;
    for entry in fs::read_dir(&merge_path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match name.as_str() {
            MERGE_FINISHED_FILE_NAME => finished = true,
            FOLD_STARTED_FILE_NAME => retired_done = true,
            FILE_LOCK_NAME | SEQ_NO_FILE_NAME => {}
            _ => names.push(name),
        }
    }

    if !finished {
        info!(path = %merge_path.display(), "discarding unfinished merge output");
        fs::remove_dir_all(&merge_path)?;
        return Ok(None);
    }

    let non_merge_id = read_non_merge_file_id(&merge_path)?;

    // Step 1: Retire every segment the merge covered
    if retired_done {
        info!(non_merge_id, "resuming interrupted fold");
    } else {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let retired = name
                .to_str()
                .and_then(parse_data_file_id)
                .map_or(false, |id| id < non_merge_id);
            if retired {
                fs::remove_file(entry.path())?;
            }
        }
        fs::File::create(merge_path.join(FOLD_STARTED_FILE_NAME))?.sync_all()?;
    }

    // Step 2: Move merge output into place, boundary file last
    for name in &names {
        fs::rename(merge_path.join(name), dir.join(name))?;
    }
    fs::rename(
        merge_path.join(MERGE_FINISHED_FILE_NAME),
        dir.join(MERGE_FINISHED_FILE_NAME),
    )?;
    fs::remove_dir_all(&merge_path)?;

    info!(non_merge_id, files = names.len(), "folded merge output");
    Ok(Some(non_merge_id))
}

/// Clears the merging flag however merge exits
struct MergeGuard<'a>(&'a AtomicBool);

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Core {
    /// Rewrite live records from sealed segments, optionally swapping the
    /// result in before returning
    pub(crate) fn merge(&self, reload: bool) -> Result<()> {
        // ===== Phase 1: checks and seal, under the write lock =====
        let mut files = self.files.write();

        if self
            .is_merging
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CaskError::MergeInProgress);
        }
        let _guard = MergeGuard(&self.is_merging);

        if files.older.is_empty() && files.active.write_off() == 0 {
            return Ok(());
        }

        let total = dir_size(&self.config.dir_path)?;
        let reclaim_at_start = self.reclaim_size.load(Ordering::SeqCst);
        let ratio = if total == 0 {
            0.0
        } else {
            reclaim_at_start as f32 / total as f32
        };
        if ratio < self.config.merge_ratio {
            return Err(CaskError::MergeRatioUnreached {
                ratio,
                threshold: self.config.merge_ratio,
            });
        }

        let required = total.saturating_sub(reclaim_at_start);
        let available = available_disk_size(&self.config.dir_path)?;
        if required >= available {
            return Err(CaskError::NoEnoughSpaceForMerge {
                required,
                available,
            });
        }

        self.rotate(&mut files)?;
        let non_merge_id = files.active.file_id();
        let merge_ids = files.older_ids();
        drop(files);

        info!(non_merge_id, segments = merge_ids.len(), "merge started");

        // ===== Phase 2: rewrite live records =====
        let merge_path = merge_dir_path(&self.config.dir_path);
        if merge_path.exists() {
            fs::remove_dir_all(&merge_path)?;
        }
        self.write_merge_output(&merge_path, &merge_ids, non_merge_id)?;

        // ===== Phase 3: swap in =====
        if reload {
            self.reload_merged(non_merge_id, reclaim_at_start)?;
        }
        info!(non_merge_id, reload, "merge finished");
        Ok(())
    }

    fn write_merge_output(
        &self,
        merge_path: &Path,
        merge_ids: &[u32],
        non_merge_id: u32,
    ) -> Result<()> {
        let merge_config = Config {
            dir_path: merge_path.to_path_buf(),
            sync_writes: false,
            bytes_per_sync: 0,
            sync_interval: None,
            index_type: IndexType::BTree,
            index_shards: 1,
            mmap_at_startup: false,
            merge_check_interval: None,
            ..self.config.clone()
        };
        let merge_core = Core::open(merge_config)?;
        let mut hint_file = DataFile::open_hint_file(merge_path)?;

        let mut rewritten = 0usize;
        {
            let mut merge_files = merge_core.files.write();
            for &file_id in merge_ids {
                let file = DataFile::open(&self.config.dir_path, file_id, IoType::Standard)?;
                let mut offset = 0u64;
                loop {
                    let (mut record, size) = match file.read_log_record(offset) {
                        Ok(read) => read,
                        Err(CaskError::EndOfLog) => break,
                        Err(e) => return Err(e),
                    };

                    let (key, _) = parse_log_record_key(&record.key)?;
                    let live = record.rec_type == LogRecordType::Normal
                        && self
                            .index_for(&key)
                            .get(&key)?
                            .map_or(false, |pos| pos.file_id == file_id && pos.offset == offset);

                    if live {
                        record.key = log_record_key_with_seq(&key, NON_TXN_SEQ);
                        let (buf, _) = encode_log_record(&record);
                        let pos = merge_core.append_log_record(&mut merge_files, &buf)?;
                        hint_file.write_hint_record(&key, &pos)?;
                        rewritten += 1;
                    }
                    offset += size;
                }
                if offset < file.size()? {
                    return Err(CaskError::CorruptRecord(format!(
                        "segment {} ends with {} unreadable bytes",
                        file_id,
                        file.size()? - offset
                    )));
                }
            }
        }

        hint_file.sync()?;
        merge_core.sync()?;
        merge_core.close()?;
        drop(merge_core);

        // Written last: its presence marks the output as complete
        let mut finished = DataFile::open_merge_finished_file(merge_path)?;
        let record = LogRecord::normal(
            MERGE_FINISHED_KEY.to_vec(),
            non_merge_id.to_string().into_bytes(),
        );
        let (buf, _) = encode_log_record(&record);
        finished.write(&buf)?;
        finished.sync()?;

        debug!(records = rewritten, "merge output written");
        Ok(())
    }

    /// Replace retired segments with the merge output while the engine stays open
    fn reload_merged(&self, non_merge_id: u32, reclaim_at_start: u64) -> Result<()> {
        let mut files = self.files.write();

        files.older.retain(|&id, _| id >= non_merge_id);
        fold_merge_dir(&self.config.dir_path)?;

        for entry in fs::read_dir(&self.config.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(parse_data_file_id) else {
                continue;
            };
            if id < non_merge_id {
                let file = DataFile::open(&self.config.dir_path, id, IoType::Standard)?;
                files.older.insert(id, file);
            }
        }

        self.remap_index_from_hint(non_merge_id)?;

        let _ = self
            .reclaim_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(reclaim_at_start))
            });
        Ok(())
    }
}
