//! Utilities for file operations with automatic parent directory creation.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::ProvisionError;

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent_exists(path: &Path) -> Result<(), ProvisionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ProvisionError::io("create directory", parent, e))?;
    }
    Ok(())
}

/// Write a file atomically, creating parent directories as needed.
///
/// Content goes to a hidden sibling `.<name>.tmp` which is flushed and
/// renamed over the destination, so readers see either the old file or the
/// new one. Step ids never start with `.`, so the temp name cannot collide
/// with another step's marker.
pub fn write_atomic<C: AsRef<[u8]>>(path: &Path, content: C) -> Result<(), ProvisionError> {
    ensure_parent_exists(path)?;

    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(path.file_name().unwrap_or_default());
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp).map_err(|e| ProvisionError::io("create", &tmp, e))?;
    file.write_all(content.as_ref())
        .and_then(|_| file.sync_all())
        .map_err(|e| ProvisionError::io("write", &tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| ProvisionError::io("rename", path, e))?;
    Ok(())
}
