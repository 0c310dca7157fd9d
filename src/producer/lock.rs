//! Advisory lock that keeps a second producer from running concurrently

use crate::error::HarvestError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Producer lock file
pub struct ProducerLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl ProducerLock {
    /// Open (creating if needed) the lock file
    pub fn open(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| HarvestError::IoError(format!("Failed to open lock file: {e}")))?;

        Ok(Self {
            lock: RwLock::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Take the lock without blocking
    ///
    /// The lock is held until the returned guard is dropped.
    pub fn try_hold(&mut self) -> Result<RwLockWriteGuard<'_, File>, HarvestError> {
        let path = self.path.display().to_string();
        self.lock.try_write().map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                HarvestError::ProducerLocked(path)
            } else {
                HarvestError::IoError(format!("Failed to acquire lock: {e}"))
            }
        })
    }
}
