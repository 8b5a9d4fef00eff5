//! Segment files
//!
//! One append-only file of encoded records, plus the single-purpose side
//! files (hint log, merge marker, sequence checkpoint) that share its format.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::fio::{new_io_manager, IoManager, IoType};

use super::record::{
    decode_log_record, decode_log_record_header, encode_log_record, encode_record_pos, LogRecord,
    RecordPos, MAX_HEADER_SIZE,
};

// =============================================================================
// File Names
// =============================================================================

/// Extension of segment files ("000000042.data")
pub const DATA_FILE_SUFFIX: &str = ".data";

/// Key → position pairs produced by merge
pub const HINT_FILE_NAME: &str = "hint-index";

/// Written last by merge; holds the first segment id merge did not cover
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// Last sequence number, persisted at close for the durable index
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// Key of the single record inside the merge-finished file
pub const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Key of the single record inside the seq-no file
pub const SEQ_NO_KEY: &[u8] = b"seq.no";

/// Path of the segment with the given id
pub fn data_file_name(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", file_id, DATA_FILE_SUFFIX))
}

/// "000000042.data" → Some(42)
pub fn parse_data_file_id(file_name: &str) -> Option<u32> {
    file_name.strip_suffix(DATA_FILE_SUFFIX)?.parse().ok()
}

// =============================================================================
// DataFile
// =============================================================================

/// An append-only log file
///
/// ## Concurrency:
/// - Reads take `&self` and are positional, so many readers can share a file
/// - Writes take `&mut self`; the engine serializes them under its write lock
pub struct DataFile {
    file_id: u32,
    path: PathBuf,
    /// Offset where the next record will be written
    write_off: u64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Open (or create) the segment with the given id
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(data_file_name(dir, file_id), file_id, io_type)
    }

    /// Open (or create) the hint log in `dir`
    pub fn open_hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Open (or create) the merge-finished marker in `dir`
    pub fn open_merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    /// Open (or create) the sequence checkpoint in `dir`
    pub fn open_seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    fn open_path(path: PathBuf, file_id: u32, io_type: IoType) -> Result<Self> {
        let io = new_io_manager(&path, io_type)?;
        let write_off = io.size()?;
        Ok(Self {
            file_id,
            path,
            write_off,
            io,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> u64 {
        self.write_off
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record starting at `offset`
    ///
    /// Returns the record and its encoded size.
    /// - `Err(EndOfLog)`: no complete record starts at `offset`
    /// - `Err(CorruptRecord)`: a complete record failed its CRC check
    pub fn read_log_record(&self, offset: u64) -> Result<(LogRecord, u64)> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Err(CaskError::EndOfLog);
        }

        // Step 1: Read as much header as the file can hold
        let header_len = (MAX_HEADER_SIZE as u64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        let n = self.io.read(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let (header, header_size) =
            decode_log_record_header(&header_buf).ok_or(CaskError::EndOfLog)?;

        // Step 2: Read the whole record in one go and let the codec verify it
        let total = header_size as u64 + header.key_size as u64 + header.value_size as u64;
        if offset + total > file_size {
            return Err(CaskError::EndOfLog);
        }
        let mut record_buf = vec![0u8; total as usize];
        let n = self.io.read(&mut record_buf, offset)?;
        if (n as u64) < total {
            return Err(CaskError::EndOfLog);
        }

        decode_log_record(&record_buf)
    }

    /// Append raw encoded bytes
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.write(buf)?;
        self.write_off += n as u64;
        Ok(())
    }

    /// Append a hint entry: the user key and the position it now lives at
    pub fn write_hint_record(&mut self, key: &[u8], pos: &RecordPos) -> Result<()> {
        let record = LogRecord::normal(key.to_vec(), encode_record_pos(pos)?);
        let (buf, _) = encode_log_record(&record);
        self.write(&buf)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Reopen the file with a different I/O strategy
    pub fn set_io_manager(&mut self, io_type: IoType) -> Result<()> {
        self.io = new_io_manager(&self.path, io_type)?;
        Ok(())
    }

    /// Cut the file back to `len` bytes and reopen it for appends
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.io = new_io_manager(&self.path, IoType::Standard)?;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;
        self.write_off = len;
        Ok(())
    }
}
