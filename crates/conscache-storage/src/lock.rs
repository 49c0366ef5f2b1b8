use fs2::FileExt as _;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::persisted::StorageError;

/// Name of the lock file inside a bound storage directory.
pub(crate) const LOCK_FILENAME: &str = ".lock";

/// An advisory, exclusive lock on a storage directory.
///
/// Held for the lifetime of a [`crate::StorageDir`] binding so that two
/// processes never scan and write the same directory at once. The lock is
/// released when the value is dropped.
#[derive(Debug)]
pub(crate) struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Tries to lock `dir` without blocking.
    pub(crate) fn try_lock(dir: &Path) -> Result<Self, StorageError> {
        let path = dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                Err(StorageError::Locked(dir.display().to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::debug!(
                target = "conscache.storage",
                path = %self.path.display(),
                error = %err,
                "failed to release storage directory lock"
            );
        }
    }
}
