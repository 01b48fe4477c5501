//! Pipeline orchestrator — one run, start to finish.
//!
//! ```text
//! lock → load watermark → scrape → stage → dedup → extract → write
//!      → save watermark → summary mail → outreach
//! ```
//!
//! The watermark is loaded once and saved at most once, after the sheet
//! write succeeded. A failed write leaves it untouched so the next run
//! retries the same messages; sheet dedup absorbs any rows that did land.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::connectivity::ConnectivityCheck;
use crate::error::PipelineError;
use crate::mail::template::{summary_body, summary_subject};
use crate::mail::{MailService, OutgoingEmail};
use crate::pipeline::dedup::{commit_boundary, new_messages, resume_index};
use crate::pipeline::extraction::ExtractionStage;
use crate::pipeline::outreach::{OutreachReport, OutreachSettings, OutreachStage};
use crate::pipeline::sheet_writer::SheetWriter;
use crate::pipeline::types::{Classifier, JobRecord, Scraper};
use crate::scrape::{STAGING_FILE, save_staging};
use crate::sheet::SheetService;
use crate::store::cursor::CURSOR_FILE;
use crate::store::lock::LOCK_FILE;
use crate::store::sent::SENT_FILE;
use crate::store::{CursorStore, RunLock, SentTracker, Watermark};

/// Result of an invocation that may be skipped because another run holds the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome<T> {
    Skipped,
    Completed(T),
}

impl<T> RunOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Skipped => None,
            Self::Completed(report) => Some(report),
        }
    }
}

/// Counts for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub scraped: usize,
    pub new_messages: usize,
    pub relevant: usize,
    pub not_relevant: usize,
    pub malformed: usize,
    pub transient: usize,
    pub appended: usize,
    pub duplicates_suppressed: usize,
    /// Watermark after the run, if one was saved.
    pub watermark: Option<Watermark>,
    pub summary_sent: bool,
    pub outreach: Option<OutreachReport>,
    /// Outreach aborted; earlier stages stay committed.
    pub outreach_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub group_name: String,
    pub scroll_window_secs: u64,
    pub data_dir: PathBuf,
    pub summary_recipient: Option<String>,
    pub run_outreach: bool,
}

fn lock_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOCK_FILE)
}

// ── Outreach runner ─────────────────────────────────────────────────

/// Outreach stage bound to the data directory (tracker + lock).
pub struct OutreachRunner {
    stage: OutreachStage,
    data_dir: PathBuf,
    connectivity: Option<ConnectivityCheck>,
}

impl OutreachRunner {
    pub fn new(
        sheet: Arc<dyn SheetService>,
        mailer: Arc<dyn MailService>,
        settings: OutreachSettings,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stage: OutreachStage::new(sheet, mailer, settings),
            data_dir: data_dir.into(),
            connectivity: None,
        }
    }

    /// Abort before touching any row when the check fails.
    pub fn with_connectivity_check(mut self, check: ConnectivityCheck) -> Self {
        self.connectivity = Some(check);
        self
    }

    /// Standalone outreach: takes the run lock itself.
    pub async fn run(&self) -> Result<RunOutcome<OutreachReport>, PipelineError> {
        let Some(_lock) = RunLock::try_acquire(lock_path(&self.data_dir))? else {
            info!("Another run holds the lock, skipping outreach");
            return Ok(RunOutcome::Skipped);
        };
        self.run_locked().await.map(RunOutcome::Completed)
    }

    /// Caller must hold the run lock.
    pub(crate) async fn run_locked(&self) -> Result<OutreachReport, PipelineError> {
        if let Some(check) = &self.connectivity {
            check.ensure().await?;
        }
        let mut tracker = SentTracker::load(self.data_dir.join(SENT_FILE))?;
        self.stage.run(&mut tracker).await
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

pub struct Pipeline {
    scraper: Arc<dyn Scraper>,
    extraction: ExtractionStage,
    writer: SheetWriter,
    mailer: Option<Arc<dyn MailService>>,
    outreach: Option<OutreachRunner>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        scraper: Arc<dyn Scraper>,
        classifier: Arc<dyn Classifier>,
        sheet: Arc<dyn SheetService>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            scraper,
            extraction: ExtractionStage::new(classifier),
            writer: SheetWriter::new(sheet),
            mailer: None,
            outreach: None,
            settings,
        }
    }

    /// Mailer for the job summary digest.
    pub fn with_mailer(mut self, mailer: Arc<dyn MailService>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn with_outreach(mut self, outreach: OutreachRunner) -> Self {
        self.outreach = Some(outreach);
        self
    }

    fn data_path(&self, file: &str) -> PathBuf {
        self.settings.data_dir.join(file)
    }

    pub async fn run(&self) -> Result<RunOutcome<RunReport>, PipelineError> {
        let Some(_lock) = RunLock::try_acquire(lock_path(&self.settings.data_dir))? else {
            info!("Another run holds the lock, skipping");
            return Ok(RunOutcome::Skipped);
        };

        info!(group = %self.settings.group_name, "Starting pipeline run");
        let cursor = CursorStore::new(self.data_path(CURSOR_FILE));
        let watermark = cursor.load()?;

        let batch = self
            .scraper
            .fetch_messages(&self.settings.group_name, self.settings.scroll_window_secs)
            .await?;
        save_staging(&self.data_path(STAGING_FILE), &batch)?;

        let start = resume_index(&batch, watermark.as_ref());
        let fresh = new_messages(&batch[start..], None);
        let mut report = RunReport {
            scraped: batch.len(),
            new_messages: fresh.len(),
            ..Default::default()
        };

        if fresh.is_empty() {
            info!(scraped = batch.len(), "No new messages since last run");
        } else {
            let extraction = self.extraction.run(&fresh).await;
            report.relevant = extraction.relevant;
            report.not_relevant = extraction.not_relevant;
            report.malformed = extraction.malformed;
            report.transient = extraction.transient;

            if extraction.all_transient() {
                error!(
                    attempted = extraction.attempted(),
                    "Every classifier call failed, watermark unchanged"
                );
                return Err(PipelineError::ClassifierUnreachable {
                    attempted: extraction.attempted(),
                });
            }

            let written = self.writer.write(&extraction.records).await.inspect_err(|e| {
                error!(error = %e, "Sheet write failed, watermark unchanged");
            })?;
            report.appended = written.appended.len();
            report.duplicates_suppressed = written.duplicates_suppressed;

            match commit_boundary(&batch, start, extraction.retry_from.as_ref()) {
                Some(boundary) => {
                    let mark = Watermark::from(boundary);
                    cursor.save(&mark)?;
                    info!(
                        sender = %mark.sender,
                        timestamp = %mark.timestamp,
                        "Watermark advanced"
                    );
                    report.watermark = Some(mark);
                }
                None => info!("No message safe to commit, watermark unchanged"),
            }

            report.summary_sent = self.send_summary(&written.appended).await;
        }

        if self.settings.run_outreach
            && let Some(outreach) = &self.outreach
        {
            match outreach.run_locked().await {
                Ok(outreach_report) => report.outreach = Some(outreach_report),
                Err(e) => {
                    error!(error = %e, "Outreach failed");
                    report.outreach_error = Some(e.to_string());
                }
            }
        }

        info!(
            scraped = report.scraped,
            new = report.new_messages,
            relevant = report.relevant,
            appended = report.appended,
            "Run completed"
        );
        Ok(RunOutcome::Completed(report))
    }

    /// Digest of newly appended jobs. Failure is logged, never fatal.
    async fn send_summary(&self, appended: &[JobRecord]) -> bool {
        if appended.is_empty() {
            return false;
        }
        let (Some(mailer), Some(recipient)) = (&self.mailer, &self.settings.summary_recipient)
        else {
            return false;
        };

        let email = OutgoingEmail {
            to: recipient.clone(),
            subject: summary_subject(&self.settings.group_name),
            body: summary_body(appended),
            attachment: None,
        };
        match mailer.send(&email).await {
            Ok(()) => {
                info!(to = %recipient, jobs = appended.len(), "Sent job summary");
                true
            }
            Err(e) => {
                warn!(to = %recipient, error = %e, "Failed to send job summary");
                false
            }
        }
    }
}
