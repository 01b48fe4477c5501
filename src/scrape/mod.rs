//! Scrape staging — the persisted copy of the last scrape and the
//! file-backed `Scraper` that reads it.
//!
//! The browser driver is a separate process. It drops its capture into the
//! staging record; the pipeline reads it through `StagingFileScraper` and
//! rewrites it after every run so the file always mirrors the batch the
//! pipeline actually saw.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PersistenceError, ScrapeError};
use crate::pipeline::types::{RawMessage, Scraper};
use crate::store::atomic::{read_json, write_json_atomic};

/// Default staging file name inside the data directory.
pub const STAGING_FILE: &str = "whatsapp_scraped_temp.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRecord {
    pub generated_at: DateTime<Local>,
    pub count: usize,
    pub messages: Vec<RawMessage>,
}

impl StagingRecord {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            generated_at: Local::now(),
            count: messages.len(),
            messages,
        }
    }
}

/// Persist a scrape batch as the staging record.
pub fn save_staging(path: &Path, messages: &[RawMessage]) -> Result<(), PersistenceError> {
    let record = StagingRecord::new(messages.to_vec());
    write_json_atomic(path, &record)?;
    debug!(path = %path.display(), count = record.count, "Saved scrape staging record");
    Ok(())
}

pub fn load_staging(path: &Path) -> Result<Option<StagingRecord>, PersistenceError> {
    read_json(path)
}

/// Scraper over a staging record written by the browser driver.
pub struct StagingFileScraper {
    path: PathBuf,
}

impl StagingFileScraper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Scraper for StagingFileScraper {
    async fn fetch_messages(
        &self,
        group_name: &str,
        scroll_window_secs: u64,
    ) -> Result<Vec<RawMessage>, ScrapeError> {
        let record = load_staging(&self.path)?.ok_or_else(|| {
            ScrapeError::Unavailable(format!(
                "no scrape capture at {} for group '{}'",
                self.path.display(),
                group_name
            ))
        })?;

        info!(
            group = group_name,
            scroll_window_secs,
            count = record.messages.len(),
            generated_at = %record.generated_at,
            "Loaded scraped messages"
        );
        Ok(record.messages)
    }
}
