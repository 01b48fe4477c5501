//! In-process collaborator doubles for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{MailError, ScrapeError};
use crate::mail::{MailService, OutgoingEmail};
use crate::pipeline::types::{Classification, Classifier, RawMessage, Scraper};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Scraper ─────────────────────────────────────────────────────────

/// Returns a fixed batch, or fails when marked unavailable.
#[derive(Default)]
pub struct StaticScraper {
    messages: Mutex<Vec<RawMessage>>,
    unavailable: Mutex<bool>,
}

impl StaticScraper {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            unavailable: Mutex::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }
}

#[async_trait]
impl Scraper for StaticScraper {
    async fn fetch_messages(
        &self,
        group_name: &str,
        _scroll_window_secs: u64,
    ) -> Result<Vec<RawMessage>, ScrapeError> {
        if *lock(&self.unavailable) {
            return Err(ScrapeError::Unavailable(format!(
                "group '{group_name}' not reachable"
            )));
        }
        Ok(lock(&self.messages).clone())
    }
}

// ── Classifier ──────────────────────────────────────────────────────

/// Answers from a script. Exhausted or unmatched input is `NotRelevant`.
#[derive(Default)]
pub struct ScriptedClassifier {
    queue: Mutex<VecDeque<Classification>>,
    by_text: HashMap<String, Classification>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    /// Answers in call order.
    pub fn new(script: impl IntoIterator<Item = Classification>) -> Self {
        Self {
            queue: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Answers keyed by exact message text. Stable across reruns.
    pub fn by_text<S: Into<String>>(script: impl IntoIterator<Item = (S, Classification)>) -> Self {
        Self {
            by_text: script.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Default::default()
        }
    }

    /// Texts seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn extract(&self, text: &str) -> Classification {
        lock(&self.calls).push(text.to_string());
        if let Some(answer) = self.by_text.get(text) {
            return answer.clone();
        }
        lock(&self.queue)
            .pop_front()
            .unwrap_or(Classification::NotRelevant)
    }
}

// ── Mailer ──────────────────────────────────────────────────────────

/// Records every send. Addresses in the failing set are rejected.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: HashSet<String>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, address: &str) -> Self {
        self.failing.insert(address.trim().to_lowercase());
        self
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl MailService for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if self.failing.contains(&email.to.trim().to_lowercase()) {
            return Err(MailError::Transport(format!(
                "550 mailbox unavailable: {}",
                email.to
            )));
        }
        lock(&self.sent).push(email.clone());
        Ok(())
    }
}
