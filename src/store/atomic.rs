//! JSON state files written with temp-file-then-rename.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::PersistenceError;

/// Read a JSON state file. `Ok(None)` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON state file atomically.
///
/// The temp file lives in the target's directory so the final rename never
/// crosses a filesystem boundary. Readers see either the old or the new
/// content, never a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let write_err = |source: std::io::Error| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let body = serde_json::to_string_pretty(value).map_err(|source| {
        PersistenceError::Serialize {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(body.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
