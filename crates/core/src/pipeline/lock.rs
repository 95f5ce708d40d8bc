//! Cross-process run lock.
//!
//! `run` and `schedule` are separate processes sharing one data directory.
//! Both take this lock for the whole run, so only one of them drives the
//! catalog at a time.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

/// Exclusive advisory lock on a file in the data directory.
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
}

/// Held for the length of a run; releases the lock when dropped.
#[derive(Debug)]
pub struct RunLockGuard {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, or `None` when another holder has it.
    pub fn try_acquire(&self) -> io::Result<Option<RunLockGuard>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("Acquired run lock {}", self.path.display());
                Ok(Some(RunLockGuard {
                    file,
                    path: self.path.clone(),
                }))
            }
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_holder_is_refused_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("priceguard.lock");
        let first = RunLock::new(&path);
        let second = RunLock::new(&path);

        let guard = first.try_acquire().unwrap();
        assert!(guard.is_some());
        assert!(path.exists());
        assert!(second.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(second.try_acquire().unwrap().is_some());
    }
}
