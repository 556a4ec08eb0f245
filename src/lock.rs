//! Process-wide exclusive lock (§4.6, §5 "Shared-resource policy"):
//! exactly one cycle may run against a given `<mydir>` at a time.
//!
//! No lock crate appears anywhere in the retrieval pack, so this is a
//! plain `O_EXCL`-style exclusive create over `std::fs`, held for the
//! lifetime of the returned guard and released (file removed) on drop.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("another cycle is already running against this directory ({path})")]
    AlreadyHeld { path: PathBuf },
    #[error("failed to acquire lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Held for the duration of one cycle; the lock file is removed on drop.
pub struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    pub fn acquire(mydir: &Path) -> Result<CycleLock, LockError> {
        let path = mydir.join(".lock");
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(CycleLock { path }),
            Err(source) if source.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LockError::AlreadyHeld { path })
            }
            Err(source) => Err(LockError::Io { path, source }),
        }
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let first = CycleLock::acquire(dir.path()).unwrap();
        let second = CycleLock::acquire(dir.path());
        assert!(matches!(second, Err(LockError::AlreadyHeld { .. })));
        drop(first);
    }

    #[test]
    fn lock_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");
        {
            let _lock = CycleLock::acquire(dir.path()).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn acquire_succeeds_again_after_release() {
        let dir = tempfile::tempdir().unwrap();
        drop(CycleLock::acquire(dir.path()).unwrap());
        assert!(CycleLock::acquire(dir.path()).is_ok());
    }
}
