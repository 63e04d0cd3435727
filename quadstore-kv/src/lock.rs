//! Exclusive ownership of a data directory.

use crate::error::{KvError, KvResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file inside the data directory.
pub const LOCK_FILE: &str = "LOCK";

/// Advisory lock on [`LOCK_FILE`], held until dropped.
pub(crate) struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Take the lock without waiting. A directory already held by another
    /// engine, in this process or another, yields [`KvError::Locked`].
    pub(crate) fn acquire(dir: &Path) -> KvResult<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if let Err(err) = file.try_lock_exclusive() {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(KvError::Locked(dir.display().to_string()));
            }
            return Err(err.into());
        }
        tracing::debug!(path = %path.display(), "data directory locked");
        Ok(Self { file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release directory lock");
        }
    }
}
