//! Shared types for the job pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

// ── Scraped message ─────────────────────────────────────────────────

/// One chat message as captured by the scraper. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub sender: String,
    pub text: String,
    /// Timestamp as rendered by the chat client (opaque to the pipeline).
    pub timestamp: String,
}

impl RawMessage {
    pub fn new(
        sender: impl Into<String>,
        text: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Dedup identity: `sender ⧺ timestamp ⧺ text`, exact and case-sensitive.
    pub fn identity_key(&self) -> String {
        let mut key =
            String::with_capacity(self.sender.len() + self.timestamp.len() + self.text.len());
        key.push_str(&self.sender);
        key.push_str(&self.timestamp);
        key.push_str(&self.text);
        key
    }
}

// ── Extracted job ───────────────────────────────────────────────────

/// Structured job posting extracted from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub date: String,
    pub company: String,
    pub role: String,
    pub location: String,
    pub experience: String,
    pub skills: String,
    pub contact_email: String,
    pub relevant: bool,
    /// Source message sender. Only used for the summary digest.
    #[serde(default)]
    pub sender: String,
}

impl JobRecord {
    /// Append-dedup identity.
    pub fn identity(&self) -> RowIdentity {
        RowIdentity::new(&self.company, &self.role, &self.contact_email)
    }

    /// Cells in sheet column order (the seven data columns).
    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.date.clone(),
            self.company.clone(),
            self.role.clone(),
            self.location.clone(),
            self.experience.clone(),
            self.skills.clone(),
            self.contact_email.clone(),
        ]
    }
}

/// `(company, role, contact_email)` normalized: trimmed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowIdentity {
    company: String,
    role: String,
    contact_email: String,
}

impl RowIdentity {
    pub fn new(company: &str, role: &str, contact_email: &str) -> Self {
        Self {
            company: normalize(company),
            role: normalize(role),
            contact_email: normalize(contact_email),
        }
    }
}

/// `(company, contact_email)` normalized. Identity for "already emailed".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContactIdentity {
    company: String,
    contact_email: String,
}

impl ContactIdentity {
    pub fn new(company: &str, contact_email: &str) -> Self {
        Self {
            company: normalize(company),
            contact_email: normalize(contact_email),
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

// ── Sheet row ───────────────────────────────────────────────────────

/// A row as read back from the spreadsheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SheetRow {
    /// 1-based sheet row number (header is row 1).
    pub row_number: usize,
    pub date: String,
    pub company: String,
    pub role: String,
    pub location: String,
    pub experience: String,
    pub skills: String,
    pub contact_email: String,
    pub outreach_status: String,
    pub outreach_sent_at: String,
    pub outreach_error: String,
}

impl SheetRow {
    pub fn identity(&self) -> RowIdentity {
        RowIdentity::new(&self.company, &self.role, &self.contact_email)
    }

    pub fn contact_identity(&self) -> ContactIdentity {
        ContactIdentity::new(&self.company, &self.contact_email)
    }

    /// The sheet column says this row was already emailed.
    pub fn marked_sent(&self) -> bool {
        !self.outreach_sent_at.trim().is_empty()
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Outcome of classifying one message.
#[derive(Debug, Clone)]
pub enum Classification {
    /// A job post matching the profile.
    Relevant(JobRecord),
    /// The model said "no job here". Counts as processed.
    NotRelevant,
    /// The model answered but the answer could not be parsed. Counts as processed.
    Malformed { reason: String },
    /// Infra failure (timeout, rate limit). NOT processed; retried next run.
    Transient { reason: String },
}

impl Classification {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Relevant(_) => "relevant",
            Self::NotRelevant => "not_relevant",
            Self::Malformed { .. } => "malformed",
            Self::Transient { .. } => "transient",
        }
    }

    /// Whether the message may count toward watermark advancement.
    pub fn is_processed(&self) -> bool {
        !matches!(self, Self::Transient { .. })
    }
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Source of raw chat messages, in on-screen (chronological) order.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch_messages(
        &self,
        group_name: &str,
        scroll_window_secs: u64,
    ) -> Result<Vec<RawMessage>, ScrapeError>;
}

/// Turns message text into a job record (or says why it could not).
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn extract(&self, text: &str) -> Classification;
}
