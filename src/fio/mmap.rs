//! Read-only memory-mapped I/O

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{CaskError, Result};

use super::IoManager;

/// Read-only view of a file through a memory map
pub struct MmapIo {
    /// `None` for empty files, which cannot be mapped
    map: Option<Mmap>,
}

impl MmapIo {
    /// Map a file, creating it first if it does not exist
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: segments are append-only and this map is dropped before
            // the file is written through any other handle.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self { map })
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data: &[u8] = match &self.map {
            Some(map) => &map[..],
            None => return Ok(0),
        };
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(CaskError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory-mapped segments are read-only",
        )))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.map.as_ref().map_or(0, |map| map.len() as u64))
    }
}
