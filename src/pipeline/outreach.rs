//! Outreach stage — emails contacts from sheet rows that were never emailed.
//!
//! "Already sent" has two sources: the sheet's `Outreach Sent At` column and
//! the local `SentTracker`. Either one is enough to skip a row. After a
//! successful send the tracker is written first; the sheet cells are
//! best-effort because the tracker alone guarantees no second email.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::mail::template::{TemplateFields, render};
use crate::mail::{MailService, OutgoingEmail};
use crate::pipeline::types::SheetRow;
use crate::sheet::{Column, SheetService};
use crate::store::SentTracker;

/// Longest error text written back to the sheet.
const MAX_ERROR_CHARS: usize = 450;

pub const STATUS_SENT: &str = "SENT";
pub const STATUS_FAILED: &str = "FAILED";

#[derive(Debug, Clone)]
pub struct OutreachSettings {
    pub subject_template: String,
    pub body_template: String,
    pub sender_name: String,
    pub attachment: Option<PathBuf>,
    /// Max emails per invocation. `0` = unlimited.
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutreachReport {
    pub eligible: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct OutreachStage {
    sheet: Arc<dyn SheetService>,
    mailer: Arc<dyn MailService>,
    settings: OutreachSettings,
}

impl OutreachStage {
    pub fn new(
        sheet: Arc<dyn SheetService>,
        mailer: Arc<dyn MailService>,
        settings: OutreachSettings,
    ) -> Self {
        Self {
            sheet,
            mailer,
            settings,
        }
    }

    pub async fn run(&self, tracker: &mut SentTracker) -> Result<OutreachReport, PipelineError> {
        self.sheet.ensure_header().await?;
        let rows = self.sheet.read_all_rows().await?;

        let mut pending = eligible_rows(&rows, tracker);
        if self.settings.limit > 0 {
            pending.truncate(self.settings.limit);
        }

        let mut report = OutreachReport {
            eligible: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            info!("No pending outreach rows");
            return Ok(report);
        }
        info!(pending = pending.len(), "Starting outreach");

        for row in pending {
            let contact = row.contact_email.trim();
            // Two rows for the same contact: the first send covers both.
            if tracker.is_sent(&row.company, contact) {
                continue;
            }

            let fields = TemplateFields::from_row(row, &self.settings.sender_name);
            let email = OutgoingEmail {
                to: contact.to_string(),
                subject: render(&self.settings.subject_template, &fields),
                body: render(&self.settings.body_template, &fields),
                attachment: self.settings.attachment.clone(),
            };

            match self.mailer.send(&email).await {
                Ok(()) => {
                    let now = Local::now();
                    if let Err(e) = tracker.mark_sent(&row.company, contact, now) {
                        error!(
                            sent = report.sent,
                            error = %e,
                            "Failed to record send, aborting outreach batch"
                        );
                        return Err(e.into());
                    }
                    report.sent += 1;
                    info!(
                        to = contact,
                        company = %fields.company,
                        role = %fields.role,
                        "Sent outreach email"
                    );

                    let sent_at = now.format("%Y-%m-%d %H:%M:%S").to_string();
                    self.mark_row(row.row_number, STATUS_SENT, Some(&sent_at), "")
                        .await;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(to = contact, error = %e, "Failed outreach email");
                    let reason: String = e.to_string().chars().take(MAX_ERROR_CHARS).collect();
                    self.mark_row(row.row_number, STATUS_FAILED, None, &reason)
                        .await;
                }
            }
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            "Outreach completed"
        );
        Ok(report)
    }

    /// Write outreach columns for one row. Failures are logged only.
    async fn mark_row(&self, row_number: usize, status: &str, sent_at: Option<&str>, error: &str) {
        let mut updates = vec![(Column::OutreachStatus, status)];
        if let Some(sent_at) = sent_at {
            updates.push((Column::OutreachSentAt, sent_at));
        }
        updates.push((Column::OutreachError, error));

        for (column, value) in updates {
            if let Err(e) = self.sheet.update_cell(row_number, column, value).await {
                warn!(row = row_number, column = column.title(), error = %e, "Sheet update failed");
            }
        }
    }
}

/// Rows with a contact, no sheet send mark, and no tracker entry, oldest first.
pub fn eligible_rows<'a>(rows: &'a [SheetRow], tracker: &SentTracker) -> Vec<&'a SheetRow> {
    rows.iter()
        .filter(|row| !row.contact_email.trim().is_empty())
        .filter(|row| !row.marked_sent())
        .filter(|row| !tracker.is_sent(&row.company, &row.contact_email))
        .collect()
}
