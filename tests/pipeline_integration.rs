//! End-to-end pipeline runs against in-memory collaborators.
//!
//! The classifier is the real `LlmClassifier` over a stub provider that
//! answers from a table keyed by message text, so prompt building, response
//! parsing and retry classification are all exercised.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use jobfeed::error::{LlmError, MailError, PipelineError, ScrapeError};
use jobfeed::llm::RetryPolicy;
use jobfeed::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use jobfeed::pipeline::extraction::LlmClassifier;
use jobfeed::pipeline::outreach::OutreachSettings;
use jobfeed::mail::{MailService, OutgoingEmail};
use jobfeed::pipeline::types::{RawMessage, Scraper};
use jobfeed::pipeline::{OutreachRunner, Pipeline, PipelineSettings, RunOutcome, RunReport};
use jobfeed::sheet::MemorySheet;
use jobfeed::store::cursor::CURSOR_FILE;
use jobfeed::store::lock::LOCK_FILE;
use jobfeed::store::sent::SENT_FILE;
use jobfeed::store::{CursorStore, RunLock, SentTracker, Watermark};

const ACME_POST: &str = "QA job at Acme, email a@acme.com";
const GLOBEX_POST: &str = "Globex hiring SDET (Playwright), send CV to hr@globex.com";
const ACME_REPOST: &str = "Reposting: QA Tester at Acme, a@acme.com";

/// Answers extraction prompts from a table keyed by message text.
#[derive(Default)]
struct TableLlm {
    answers: HashMap<String, String>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl TableLlm {
    fn new() -> Self {
        let mut answers = HashMap::new();
        answers.insert(
            ACME_POST.to_string(),
            r#"{"relevant": true, "company": "Acme", "role": "QA Tester", "location": "Remote", "experience": "2 years", "skills": ["Selenium", "API testing"], "contact_email": "a@acme.com"}"#.to_string(),
        );
        answers.insert(
            GLOBEX_POST.to_string(),
            "```json\n{\"relevant\": true, \"company\": \"Globex\", \"role\": \"SDET\", \"location\": \"\", \"experience\": \"\", \"skills\": \"Playwright\", \"contact_email\": \"hr@globex.com\"}\n```".to_string(),
        );
        answers.insert(
            ACME_REPOST.to_string(),
            r#"{"relevant": true, "company": "ACME", "role": "qa tester", "location": "", "experience": "", "skills": "", "contact_email": "A@acme.com"}"#.to_string(),
        );
        Self {
            answers,
            ..Default::default()
        }
    }

    fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for TableLlm {
    fn model_name(&self) -> &str {
        "table"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let text = prompt
            .split_once("Job post text:\n")
            .map(|(_, text)| text.to_string())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(text.clone());

        if self.failing.lock().unwrap().contains(&text) {
            return Err(LlmError::RequestFailed {
                provider: "table".into(),
                reason: "HTTP 503: upstream unavailable".into(),
            });
        }

        let content = self
            .answers
            .get(&text)
            .cloned()
            .unwrap_or_else(|| r#"{"relevant": false}"#.to_string());
        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Serves whatever batch it currently holds.
#[derive(Default)]
struct StaticScraper {
    messages: Mutex<Vec<RawMessage>>,
    unavailable: Mutex<bool>,
}

impl StaticScraper {
    fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            ..Default::default()
        }
    }

    fn set_messages(&self, messages: Vec<RawMessage>) {
        *self.messages.lock().unwrap() = messages;
    }

    fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl Scraper for StaticScraper {
    async fn fetch_messages(
        &self,
        group_name: &str,
        _scroll_window_secs: u64,
    ) -> Result<Vec<RawMessage>, ScrapeError> {
        if *self.unavailable.lock().unwrap() {
            return Err(ScrapeError::Unavailable(format!("group '{group_name}' not found")));
        }
        Ok(self.messages.lock().unwrap().clone())
    }
}

/// Records every email instead of sending it.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailService for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    llm: Arc<TableLlm>,
    scraper: Arc<StaticScraper>,
    sheet: Arc<MemorySheet>,
    mailer: Arc<RecordingMailer>,
}

impl Harness {
    fn new(batch: Vec<RawMessage>) -> Self {
        Self::with_sheet(batch, MemorySheet::new())
    }

    fn with_sheet(batch: Vec<RawMessage>, sheet: MemorySheet) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cv.pdf"), b"%PDF-1.4 cv").unwrap();
        Self {
            dir,
            llm: Arc::new(TableLlm::new()),
            scraper: Arc::new(StaticScraper::new(batch)),
            sheet: Arc::new(sheet),
            mailer: Arc::new(RecordingMailer::default()),
        }
    }

    fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    fn pipeline(&self, outreach_limit: usize) -> Pipeline {
        let keywords = vec!["qa".into(), "playwright".into()];
        let classifier =
            LlmClassifier::new(self.llm.clone(), keywords).with_retry(RetryPolicy::immediate(2));
        let outreach = OutreachRunner::new(
            self.sheet.clone(),
            self.mailer.clone(),
            OutreachSettings {
                subject_template: "Application for {role} - {company}".into(),
                body_template: "Hi {company} team,\nI'd like the {role} role.\n{sender_name}".into(),
                sender_name: "jane".into(),
                attachment: Some(self.data_dir().join("cv.pdf")),
                limit: outreach_limit,
            },
            self.data_dir(),
        );
        Pipeline::new(
            self.scraper.clone(),
            Arc::new(classifier),
            self.sheet.clone(),
            PipelineSettings {
                group_name: "Qa Paid Experience".into(),
                scroll_window_secs: 30,
                data_dir: self.data_dir().to_path_buf(),
                summary_recipient: None,
                run_outreach: true,
            },
        )
        .with_mailer(self.mailer.clone())
        .with_outreach(outreach)
    }

    async fn run(&self) -> RunReport {
        match self.pipeline(0).run().await.unwrap() {
            RunOutcome::Completed(report) => report,
            RunOutcome::Skipped => panic!("run unexpectedly skipped"),
        }
    }

    fn watermark(&self) -> Option<Watermark> {
        CursorStore::new(self.data_dir().join(CURSOR_FILE))
            .load()
            .unwrap()
    }

    fn assert_unique_identities(&self) {
        let rows = self.sheet.rows();
        let identities: HashSet<_> = rows.iter().map(|r| r.identity()).collect();
        assert_eq!(identities.len(), rows.len(), "duplicate identity in sheet");
    }
}

fn scenario_batch() -> Vec<RawMessage> {
    vec![
        RawMessage::new("A", "hi", "t1"),
        RawMessage::new("B", ACME_POST, "t2"),
    ]
}

#[tokio::test]
async fn first_run_appends_job_and_advances_watermark() {
    let h = Harness::new(scenario_batch());
    let report = h.run().await;

    assert_eq!(report.new_messages, 2);
    assert_eq!(report.relevant, 1);
    assert_eq!(report.appended, 1);

    let rows = h.sheet.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].company, "Acme");
    assert_eq!(rows[0].date, "t2");
    assert_eq!(rows[0].skills, "Selenium, API testing");

    let mark = h.watermark().unwrap();
    assert_eq!(mark, Watermark::from(&RawMessage::new("B", ACME_POST, "t2")));

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@acme.com");
    assert_eq!(sent[0].subject, "Application for QA Tester - Acme");
    assert!(sent[0].attachment.is_some());
}

#[tokio::test]
async fn rerun_on_same_batch_is_a_no_op() {
    let h = Harness::new(scenario_batch());
    h.run().await;
    let calls_after_first = h.llm.calls().len();

    let report = h.run().await;
    assert_eq!(report.new_messages, 0);
    assert_eq!(report.appended, 0);
    assert_eq!(report.outreach.unwrap().sent, 0);

    assert_eq!(h.sheet.rows().len(), 1);
    assert_eq!(h.mailer.sent().len(), 1);
    assert_eq!(h.llm.calls().len(), calls_after_first);
}

#[tokio::test]
async fn same_identity_with_different_dates_appended_once() {
    let h = Harness::new(vec![
        RawMessage::new("B", ACME_POST, "t2"),
        RawMessage::new("C", ACME_REPOST, "t3"),
    ]);
    let report = h.run().await;

    assert_eq!(report.relevant, 2);
    assert_eq!(report.appended, 1);
    assert_eq!(report.duplicates_suppressed, 1);
    assert_eq!(h.sheet.rows()[0].date, "t2");
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn append_failure_leaves_watermark_and_recovers() {
    let h = Harness::with_sheet(
        vec![
            RawMessage::new("B", ACME_POST, "t2"),
            RawMessage::new("D", GLOBEX_POST, "t4"),
        ],
        MemorySheet::new().fail_appends_after(1),
    );

    let err = h.pipeline(0).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::SheetWrite { appended: 1, .. }));
    assert!(h.watermark().is_none());
    assert!(h.mailer.sent().is_empty());

    h.sheet.heal();
    let report = h.run().await;
    assert_eq!(report.appended, 1);
    assert_eq!(report.duplicates_suppressed, 1);
    assert_eq!(h.sheet.rows().len(), 2);
    h.assert_unique_identities();
    assert_eq!(h.watermark().unwrap().timestamp, "t4");
}

#[tokio::test]
async fn transient_failure_stops_watermark_before_failed_message() {
    let batch = vec![
        RawMessage::new("B", ACME_POST, "t2"),
        RawMessage::new("D", GLOBEX_POST, "t4"),
        RawMessage::new("E", "lunch?", "t5"),
    ];
    let h = Harness::new(batch);
    h.llm.fail_on(GLOBEX_POST);

    let report = h.run().await;
    assert_eq!(report.transient, 1);
    assert_eq!(h.watermark().unwrap().timestamp, "t2");
    assert_eq!(h.sheet.rows().len(), 1);

    h.llm.heal();
    let report = h.run().await;
    assert_eq!(report.new_messages, 2);
    assert_eq!(report.appended, 1);
    assert_eq!(h.watermark().unwrap().timestamp, "t5");
    assert_eq!(h.sheet.rows().len(), 2);
}

#[tokio::test]
async fn failed_post_between_repeated_messages_is_retried() {
    let h = Harness::new(vec![
        RawMessage::new("A", "ok", "t1"),
        RawMessage::new("B", GLOBEX_POST, "t1"),
        RawMessage::new("A", "ok", "t1"),
        RawMessage::new("C", "lunch", "t2"),
    ]);
    h.llm.fail_on(GLOBEX_POST);

    let report = h.run().await;
    assert_eq!(report.transient, 1);
    assert!(h.watermark().is_none());
    assert!(h.sheet.rows().is_empty());

    h.llm.heal();
    let report = h.run().await;
    assert_eq!(report.appended, 1);
    assert_eq!(h.sheet.rows()[0].company, "Globex");
    assert_eq!(h.watermark().unwrap().text, "lunch");
}

#[tokio::test]
async fn unreachable_classifier_fails_run_without_moving_watermark() {
    let h = Harness::new(vec![RawMessage::new("B", ACME_POST, "t2")]);
    h.llm.fail_on(ACME_POST);

    let err = h.pipeline(0).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::ClassifierUnreachable { attempted: 1 }));
    assert!(h.watermark().is_none());
    assert!(h.sheet.rows().is_empty());
}

#[tokio::test]
async fn held_lock_skips_run_without_touching_state() {
    let h = Harness::new(scenario_batch());
    let _held = RunLock::try_acquire(h.data_dir().join(LOCK_FILE))
        .unwrap()
        .unwrap();

    let outcome = h.pipeline(0).run().await.unwrap();
    assert!(outcome.is_skipped());
    assert!(h.watermark().is_none());
    assert!(h.llm.calls().is_empty());
    assert!(h.sheet.rows().is_empty());
    assert!(!h.data_dir().join(SENT_FILE).exists());
}

#[tokio::test]
async fn missing_watermark_in_batch_reprocesses_without_duplicates() {
    let h = Harness::new(scenario_batch());
    h.run().await;

    // History rotated: the watermark message is gone from the new scrape.
    h.scraper.set_messages(vec![
        RawMessage::new("B", ACME_POST, "t2-edited"),
        RawMessage::new("D", GLOBEX_POST, "t4"),
    ]);
    let report = h.run().await;
    assert_eq!(report.new_messages, 2);
    assert_eq!(report.appended, 1);
    assert_eq!(report.duplicates_suppressed, 1);
    h.assert_unique_identities();
    assert_eq!(h.mailer.sent().len(), 2);
}

#[tokio::test]
async fn outreach_limit_spreads_sends_across_runs() {
    let h = Harness::new(vec![
        RawMessage::new("B", ACME_POST, "t2"),
        RawMessage::new("D", GLOBEX_POST, "t4"),
    ]);

    let first = h.pipeline(1).run().await.unwrap().completed().unwrap();
    assert_eq!(first.appended, 2);
    assert_eq!(first.outreach.unwrap().sent, 1);

    let second = h.pipeline(1).run().await.unwrap().completed().unwrap();
    assert_eq!(second.outreach.unwrap().sent, 1);

    let third = h.pipeline(1).run().await.unwrap().completed().unwrap();
    assert_eq!(third.outreach.unwrap().sent, 0);

    let recipients: Vec<String> = h.mailer.sent().into_iter().map(|e| e.to).collect();
    assert_eq!(recipients, vec!["a@acme.com", "hr@globex.com"]);

    let tracker = SentTracker::load(h.data_dir().join(SENT_FILE)).unwrap();
    assert_eq!(tracker.len(), 2);
    assert!(tracker.is_sent("globex", "HR@globex.com"));
}

#[tokio::test]
async fn scrape_failure_is_an_error_and_touches_nothing() {
    let h = Harness::new(scenario_batch());
    h.scraper.set_unavailable(true);

    let err = h.pipeline(0).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Scrape(_)));
    assert!(h.watermark().is_none());
    assert!(h.mailer.sent().is_empty());
}
