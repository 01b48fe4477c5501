//! Sheet writer — appends records whose identity is not already in the sheet.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::pipeline::types::{JobRecord, RowIdentity};
use crate::sheet::SheetService;

/// What one write pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub appended: Vec<JobRecord>,
    pub duplicates_suppressed: usize,
}

pub struct SheetWriter {
    sheet: Arc<dyn SheetService>,
}

impl SheetWriter {
    pub fn new(sheet: Arc<dyn SheetService>) -> Self {
        Self { sheet }
    }

    /// Append new records in order. Rows are read fresh on every call.
    ///
    /// A read or append failure aborts the rest of the batch; the error
    /// reports how many rows went in before it.
    pub async fn write(&self, records: &[JobRecord]) -> Result<WriteReport, PipelineError> {
        let mut report = WriteReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let existing = self
            .sheet
            .read_all_rows()
            .await
            .map_err(|source| PipelineError::SheetWrite {
                appended: 0,
                source,
            })?;
        let mut seen: HashSet<RowIdentity> = existing.iter().map(|row| row.identity()).collect();

        for record in records {
            if !seen.insert(record.identity()) {
                debug!(
                    company = %record.company,
                    role = %record.role,
                    contact_email = %record.contact_email,
                    "Duplicate job suppressed"
                );
                report.duplicates_suppressed += 1;
                continue;
            }

            if let Err(source) = self.sheet.append_row(record).await {
                error!(
                    appended = report.appended.len(),
                    error = %source,
                    "Sheet append failed, aborting write batch"
                );
                return Err(PipelineError::SheetWrite {
                    appended: report.appended.len(),
                    source,
                });
            }
            report.appended.push(record.clone());
        }

        info!(
            appended = report.appended.len(),
            duplicates = report.duplicates_suppressed,
            "Sheet write complete"
        );
        Ok(report)
    }
}
