//! File I/O Module
//!
//! Interchangeable I/O strategies behind one small contract.
//!
//! ## Strategies
//! - `FileIo`: buffered standard I/O, used for every writable segment
//! - `MmapIo`: read-only memory map, used to scan segments while the
//!   index is rebuilt at startup; writes are rejected

mod file_io;
mod mmap;

use std::path::Path;

use crate::error::Result;

pub use file_io::FileIo;
pub use mmap::MmapIo;

/// Permissions for newly created data files
#[cfg(unix)]
pub(crate) const DATA_FILE_PERM: u32 = 0o644;

/// Positional reads plus append-only writes
pub trait IoManager: Send + Sync {
    /// Read into `buf` starting at `offset`, returning the bytes read
    /// (fewer than `buf.len()` only at end of file)
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Append `buf` at the end of the file
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Flush written data to stable storage
    fn sync(&self) -> Result<()>;

    /// Current file length in bytes
    fn size(&self) -> Result<u64>;
}

/// Which strategy to open a file with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    Standard,
    MemoryMap,
}

/// Open `path` with the requested strategy, creating the file if missing
pub fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>> {
    match io_type {
        IoType::Standard => Ok(Box::new(FileIo::open(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::open(path)?)),
    }
}
