//! Sent-email tracker — local record of which contacts were already emailed.
//!
//! Independent of the spreadsheet so that a failed cell update or a manual
//! edit of the sheet never causes a second email to the same contact.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::atomic::{read_json, write_json_atomic};
use crate::error::PersistenceError;
use crate::pipeline::types::ContactIdentity;

/// Default tracker file name inside the data directory.
pub const SENT_FILE: &str = "sent_company_emails.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    pub company: String,
    pub contact_email: String,
    pub sent_at: DateTime<Local>,
}

/// Timestamp format of the legacy `{ "date|company|role|email": "..." }` file.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// On-disk shapes. The legacy map is imported and rewritten as records on
/// the next send.
#[derive(Deserialize)]
#[serde(untagged)]
enum TrackerFile {
    Records(Vec<SentRecord>),
    Legacy(BTreeMap<String, String>),
}

impl TrackerFile {
    fn into_records(self) -> Vec<SentRecord> {
        match self {
            Self::Records(records) => records,
            Self::Legacy(entries) => {
                info!(entries = entries.len(), "Importing legacy sent tracker");
                entries
                    .iter()
                    .filter_map(|(key, sent_at)| legacy_record(key, sent_at))
                    .collect()
            }
        }
    }
}

fn legacy_record(key: &str, sent_at: &str) -> Option<SentRecord> {
    let parts: Vec<&str> = key.split('|').collect();
    let [_date, company, _role, contact_email] = parts.as_slice() else {
        warn!(key, "Skipping unrecognized legacy tracker key");
        return None;
    };
    let sent_at = NaiveDateTime::parse_from_str(sent_at.trim(), LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| {
            warn!(key, sent_at, "Unreadable legacy send time, using import time");
            Local::now()
        });
    Some(SentRecord {
        company: company.trim().to_string(),
        contact_email: contact_email.trim().to_string(),
        sent_at,
    })
}

pub struct SentTracker {
    path: PathBuf,
    records: Vec<SentRecord>,
    index: HashSet<ContactIdentity>,
}

impl SentTracker {
    /// Load the tracker from disk. A missing file is an empty tracker.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let records = read_json::<TrackerFile>(&path)?
            .map(TrackerFile::into_records)
            .unwrap_or_default();
        let index = records
            .iter()
            .map(|r| ContactIdentity::new(&r.company, &r.contact_email))
            .collect();
        debug!(path = %path.display(), records = records.len(), "Loaded sent tracker");
        Ok(Self {
            path,
            records,
            index,
        })
    }

    pub fn is_sent(&self, company: &str, contact_email: &str) -> bool {
        self.index
            .contains(&ContactIdentity::new(company, contact_email))
    }

    /// Record a send and persist immediately.
    ///
    /// Returns `Ok(false)` without touching disk when the identity is
    /// already recorded.
    pub fn mark_sent(
        &mut self,
        company: &str,
        contact_email: &str,
        sent_at: DateTime<Local>,
    ) -> Result<bool, PersistenceError> {
        let identity = ContactIdentity::new(company, contact_email);
        if self.index.contains(&identity) {
            debug!(company, contact_email, "Already marked sent");
            return Ok(false);
        }

        self.records.push(SentRecord {
            company: company.trim().to_string(),
            contact_email: contact_email.trim().to_string(),
            sent_at,
        });
        if let Err(e) = write_json_atomic(&self.path, &self.records) {
            self.records.pop();
            return Err(e);
        }
        self.index.insert(identity);
        info!(company, contact_email, "Recorded outreach send");
        Ok(true)
    }

    pub fn records(&self) -> &[SentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
