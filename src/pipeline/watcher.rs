//! Sheet watcher — polls the sheet and triggers outreach when rows are added.
//!
//! Each poll takes a snapshot (data row count + SHA-256 of the rows) and
//! compares it to the one persisted from the previous poll. Outreach runs
//! only when the content changed AND the row count grew; outreach's own cell
//! updates change the hash but never the count, so they do not retrigger.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::error::{PersistenceError, PipelineError};
use crate::pipeline::orchestrator::OutreachRunner;
use crate::pipeline::types::SheetRow;
use crate::sheet::SheetService;
use crate::store::RunLock;
use crate::store::atomic::{read_json, write_json_atomic};
use crate::store::lock::LOCK_FILE;

pub const WATCH_STATE_FILE: &str = "sheet_watch_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub rows: usize,
    pub hash: String,
}

impl SheetSnapshot {
    pub fn of(rows: &[SheetRow]) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_string(rows)?;
        Ok(Self {
            rows: rows.len(),
            hash: format!("{:x}", Sha256::digest(encoded.as_bytes())),
        })
    }
}

/// What one poll saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// No prior state; baseline recorded.
    Initialized { outreach_sent: Option<usize> },
    Unchanged,
    /// Content changed without new rows (edits, outreach marks).
    Edited,
    /// New rows; outreach ran.
    RowsAdded { previous: usize, current: usize, sent: usize },
    /// Another run holds the lock.
    Skipped,
}

pub struct SheetWatcher {
    sheet: Arc<dyn SheetService>,
    outreach: OutreachRunner,
    data_dir: PathBuf,
    interval: Duration,
    send_on_start: bool,
}

impl SheetWatcher {
    pub fn new(
        sheet: Arc<dyn SheetService>,
        outreach: OutreachRunner,
        data_dir: impl Into<PathBuf>,
        interval: Duration,
        send_on_start: bool,
    ) -> Self {
        Self {
            sheet,
            outreach,
            data_dir: data_dir.into(),
            interval,
            send_on_start,
        }
    }

    fn state_path(&self) -> PathBuf {
        self.data_dir.join(WATCH_STATE_FILE)
    }

    /// One poll cycle. Holds the run lock throughout.
    pub async fn poll_once(&self) -> Result<WatchEvent, PipelineError> {
        let Some(_lock) = RunLock::try_acquire(self.data_dir.join(LOCK_FILE))? else {
            info!("Another run holds the lock, skipping watch cycle");
            return Ok(WatchEvent::Skipped);
        };

        let rows = self.sheet.read_all_rows().await?;
        let state_path = self.state_path();
        let snapshot =
            SheetSnapshot::of(&rows).map_err(|source| PersistenceError::Serialize {
                path: state_path.clone(),
                source,
            })?;
        let previous: Option<SheetSnapshot> = read_json(&state_path)?;

        let event = match previous {
            None => {
                info!(rows = snapshot.rows, "Initialized watcher state");
                let outreach_sent = if self.send_on_start && snapshot.rows > 0 {
                    Some(self.outreach.run_locked().await?.sent)
                } else {
                    None
                };
                WatchEvent::Initialized { outreach_sent }
            }
            Some(prev) if prev.hash == snapshot.hash => {
                info!("No sheet changes detected");
                WatchEvent::Unchanged
            }
            Some(prev) if snapshot.rows > prev.rows => {
                info!(
                    previous = prev.rows,
                    current = snapshot.rows,
                    "Detected new sheet rows, triggering outreach"
                );
                let report = self.outreach.run_locked().await?;
                WatchEvent::RowsAdded {
                    previous: prev.rows,
                    current: snapshot.rows,
                    sent: report.sent,
                }
            }
            Some(_) => {
                info!("Sheet changed but no new rows, skipping outreach");
                WatchEvent::Edited
            }
        };

        write_json_atomic(&state_path, &snapshot)?;
        Ok(event)
    }

    /// Poll on an interval until `shutdown` resolves. Cycle errors are logged
    /// and the loop carries on.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        info!(interval_secs = self.interval.as_secs(), "Watching sheet");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Watcher cycle failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("Sheet watcher shutting down");
                    break;
                }
            }
        }
    }
}
