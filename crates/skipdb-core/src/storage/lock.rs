use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::StorageError;

/// A file-based lock using advisory locking (`flock(2)` on Unix).
///
/// Held by a database handle for its whole lifetime so that a second process
/// cannot open the same file. Released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
}

impl FileLock {
    fn open_lock_file(path: &Path) -> Result<File, StorageError> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    /// Acquire an exclusive lock on the file at `path`, blocking until it is free.
    pub fn exclusive(path: &Path) -> Result<Self, StorageError> {
        let file = Self::open_lock_file(path)?;
        file.lock_exclusive()
            .map_err(|_| StorageError::FileLocked)?;
        Ok(Self { _file: file })
    }

    /// Try to acquire an exclusive lock without blocking.
    /// Returns `Err(StorageError::FileLocked)` if the lock is held.
    pub fn try_exclusive(path: &Path) -> Result<Self, StorageError> {
        let file = Self::open_lock_file(path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::FileLocked)?;
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_exclusive_blocks_exclusive() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("test.lock");

        let _lock = FileLock::exclusive(&lock_path).unwrap();
        match FileLock::try_exclusive(&lock_path) {
            Err(StorageError::FileLocked) => {}
            other => panic!("expected FileLocked, got {other:?}"),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("test.lock");

        {
            let _lock = FileLock::try_exclusive(&lock_path).unwrap();
        }
        let _again = FileLock::try_exclusive(&lock_path).unwrap();
    }
}
