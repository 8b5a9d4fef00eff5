//! Filesystem helpers shared by merge, stat and backup

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Total size of all regular files below `dir`, recursively
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut size = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            size += dir_size(&entry.path())?;
        } else {
            size += meta.len();
        }
    }
    Ok(size)
}

/// Free bytes on the filesystem holding `dir`
pub fn available_disk_size(dir: &Path) -> Result<u64> {
    Ok(fs2::available_space(dir)?)
}

/// Copy `src` into `dst` recursively, skipping entries whose file name is in `exclude`
pub fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|e| name.to_str() == Some(*e)) {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir(&from, &to, exclude)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
