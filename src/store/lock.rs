//! Cross-run mutual exclusion.
//!
//! An advisory exclusive lock on `<data_dir>/pipeline.lock`. The OS drops the
//! lock when the owning process exits, so a crashed run never wedges the
//! next one.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::PersistenceError;

pub const LOCK_FILE: &str = "pipeline.lock";

/// Held for the duration of a run; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock without waiting.
    ///
    /// `Ok(None)` when another run holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let lock_err = |source: std::io::Error| PersistenceError::Lock {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(lock_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "Run lock acquired");
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(lock_err(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        } else {
            debug!(path = %self.path.display(), "Run lock released");
        }
    }
}
