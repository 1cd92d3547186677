//! Exclusive ownership of a target root for the duration of a run.
//!
//! The lock is a `flock(2)` advisory lock on `<root>/.provisor/lock`. It is
//! released when the guard drops, and by the kernel if the process dies, so
//! a crashed run never leaves the root wedged.

use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::common::paths::lock_path;
use crate::error::ProvisionError;

/// Held for as long as the run owns the root.
#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    /// Take the lock without blocking. Fails with `RootLocked` if another
    /// run holds it.
    pub fn acquire(root: &Path) -> Result<Self, ProvisionError> {
        let path = lock_path(root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ProvisionError::io("create directory", parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| ProvisionError::io("open lock file", &path, e))?;

        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(ProvisionError::RootLocked {
                    root: root.to_path_buf(),
                });
            }
            return Err(ProvisionError::io("lock", &path, err));
        }

        // The file stays empty; rewriting it would touch the root on every run.
        tracing::debug!(path = %path.display(), "acquired root lock");

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        // SAFETY: as in acquire; closing the file would release it anyway.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::debug!(path = %self.path.display(), "released root lock");
    }
}
