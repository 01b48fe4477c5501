//! Cursor store — the watermark of the last processed message.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::{read_json, write_json_atomic};
use crate::error::PersistenceError;
use crate::pipeline::types::RawMessage;

/// Default cursor file name inside the data directory.
pub const CURSOR_FILE: &str = "last_processed.json";

/// Last processed message. Enough to re-locate the boundary in a new batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub sender: String,
    pub text: String,
    pub timestamp: String,
}

impl Watermark {
    pub fn identity_key(&self) -> String {
        let mut key =
            String::with_capacity(self.sender.len() + self.timestamp.len() + self.text.len());
        key.push_str(&self.sender);
        key.push_str(&self.timestamp);
        key.push_str(&self.text);
        key
    }
}

impl From<&RawMessage> for Watermark {
    fn from(msg: &RawMessage) -> Self {
        Self {
            sender: msg.sender.clone(),
            text: msg.text.clone(),
            timestamp: msg.timestamp.clone(),
        }
    }
}

/// File-backed watermark.
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// `None` means "no run has committed yet": process everything.
    pub fn load(&self) -> Result<Option<Watermark>, PersistenceError> {
        let watermark = read_json::<Watermark>(&self.path)?;
        debug!(path = %self.path.display(), found = watermark.is_some(), "Loaded watermark");
        Ok(watermark)
    }

    pub fn save(&self, watermark: &Watermark) -> Result<(), PersistenceError> {
        write_json_atomic(&self.path, watermark)
    }
}
