//! Extraction stage — classifies new messages into job records.
//!
//! Flow per message:
//! 1. `Classifier::extract()` → structured outcome
//! 2. Relevant records are stamped with the message's date/sender and forwarded
//! 3. The first transient failure is reported as `retry_from`
//!
//! The watermark must not move past `retry_from`, so that message is retried
//! next run. "Not relevant" and malformed answers count as processed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::{RetryPolicy, complete_with_retry};
use crate::pipeline::types::{Classification, Classifier, JobRecord, RawMessage};

/// Temperature for extraction (deterministic).
const EXTRACTION_TEMPERATURE: f32 = 0.0;

/// Max tokens for the extraction call. The answer is one small JSON object.
const EXTRACTION_MAX_TOKENS: u32 = 512;

/// Default CV keywords used for relevance filtering.
pub const DEFAULT_CV_KEYWORDS: &[&str] = &[
    "qa",
    "quality assurance",
    "software testing",
    "automation testing",
    "playwright",
    "selenium",
    "api testing",
    "python",
    "manual testing",
    "test engineer",
];

// ── LLM classifier ──────────────────────────────────────────────────

/// Classifier backed by an LLM provider.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    keywords: Vec<String>,
    retry: RetryPolicy,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, keywords: Vec<String>) -> Self {
        Self {
            llm,
            keywords,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn extract(&self, text: &str) -> Classification {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extraction_system_prompt()),
            ChatMessage::user(build_extraction_user_prompt(&self.keywords, text)),
        ])
        .with_temperature(EXTRACTION_TEMPERATURE)
        .with_max_tokens(EXTRACTION_MAX_TOKENS);

        let response = match complete_with_retry(self.llm.as_ref(), request, self.retry).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                return Classification::Transient {
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                return Classification::Malformed {
                    reason: e.to_string(),
                };
            }
        };

        match parse_job_response(&response.content) {
            Ok(Some(record)) => Classification::Relevant(record),
            Ok(None) => Classification::NotRelevant,
            Err(reason) => {
                warn!(
                    raw_response = %response.content,
                    error = %reason,
                    "Failed to parse extraction response"
                );
                Classification::Malformed { reason }
            }
        }
    }
}

// ── Stage ───────────────────────────────────────────────────────────

/// Result of running the extraction stage over a batch.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    /// Relevant records, in message order.
    pub records: Vec<JobRecord>,
    /// First message that failed transiently. `None` when every message was
    /// processed.
    pub retry_from: Option<RawMessage>,
    pub relevant: usize,
    pub not_relevant: usize,
    pub malformed: usize,
    pub transient: usize,
}

impl ExtractionOutcome {
    pub fn attempted(&self) -> usize {
        self.relevant + self.not_relevant + self.malformed + self.transient
    }

    /// Every message failed at the transport level.
    pub fn all_transient(&self) -> bool {
        self.transient > 0 && self.transient == self.attempted()
    }
}

pub struct ExtractionStage {
    classifier: Arc<dyn Classifier>,
}

impl ExtractionStage {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    /// Classify messages in order. Per-message failures never abort the batch.
    pub async fn run(&self, messages: &[RawMessage]) -> ExtractionOutcome {
        info!(count = messages.len(), "Running extraction");

        let mut outcome = ExtractionOutcome::default();

        for message in messages {
            let classification = self.classifier.extract(&message.text).await;
            debug!(
                sender = %message.sender,
                timestamp = %message.timestamp,
                outcome = classification.label(),
                "Message classified"
            );

            if outcome.retry_from.is_none() && !classification.is_processed() {
                outcome.retry_from = Some(message.clone());
            }

            match classification {
                Classification::Relevant(mut record) => {
                    record.date = message.timestamp.clone();
                    record.sender = message.sender.clone();
                    record.relevant = true;
                    outcome.records.push(record);
                    outcome.relevant += 1;
                }
                Classification::NotRelevant => outcome.not_relevant += 1,
                Classification::Malformed { reason } => {
                    warn!(
                        sender = %message.sender,
                        timestamp = %message.timestamp,
                        error = %reason,
                        "Skipping message with malformed classifier response"
                    );
                    outcome.malformed += 1;
                }
                Classification::Transient { reason } => {
                    warn!(
                        sender = %message.sender,
                        timestamp = %message.timestamp,
                        error = %reason,
                        "Classifier unavailable, message will be retried next run"
                    );
                    outcome.transient += 1;
                }
            }
        }

        info!(
            relevant = outcome.relevant,
            not_relevant = outcome.not_relevant,
            malformed = outcome.malformed,
            transient = outcome.transient,
            "Extraction complete"
        );
        outcome
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_extraction_system_prompt() -> String {
    "Return valid JSON only. No markdown. No extra keys.".to_string()
}

fn build_extraction_user_prompt(keywords: &[String], text: &str) -> String {
    let mut prompt = String::with_capacity(512 + text.len());
    prompt.push_str("You are an assistant that filters WhatsApp job posts.\n");
    prompt.push_str(&format!("CV keywords: {}\n", keywords.join(", ")));
    prompt.push_str("Return JSON ONLY with keys exactly as:\n");
    prompt.push_str(
        "{ \"relevant\": true/false, \"company\": \"\", \"role\": \"\", \"location\": \"\", \
         \"experience\": \"\", \"skills\": \"\", \"contact_email\": \"\" }\n",
    );
    prompt.push_str("If not a job post or not relevant to keywords, set relevant=false.\n");
    prompt.push_str(&format!("Job post text:\n{}", text));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the model's answer. `Ok(None)` means "not relevant".
fn parse_job_response(raw: &str) -> Result<Option<JobRecord>, String> {
    let json_str = extract_json_object(raw);
    let value: Value =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    let object = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let relevant = object.get("relevant").map(truthy).unwrap_or(false);
    if !relevant {
        return Ok(None);
    }

    let field = |key: &str| object.get(key).map(field_text).unwrap_or_default();
    Ok(Some(JobRecord {
        company: field("company"),
        role: field("role"),
        location: field("location"),
        experience: field("experience"),
        skills: field("skills"),
        contact_email: field("contact_email"),
        relevant: true,
        ..Default::default()
    }))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Render a field as sheet text. Lists (the model likes them for skills) are
/// joined with ", ".
fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(field_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};
    use crate::testing::ScriptedClassifier;

    // ── Prompt construction tests ───────────────────────────────────

    #[test]
    fn user_prompt_includes_keywords_and_text() {
        let keywords = vec!["qa".to_string(), "playwright".to_string()];
        let prompt = build_extraction_user_prompt(&keywords, "QA job at Acme");
        assert!(prompt.contains("qa, playwright"));
        assert!(prompt.contains("contact_email"));
        assert!(prompt.ends_with("QA job at Acme"));
    }

    // ── Response parsing tests ──────────────────────────────────────

    #[test]
    fn parse_relevant_response() {
        let raw = r#"{"relevant": true, "company": "Acme", "role": "QA Tester", "location": "Remote", "experience": "2 years", "skills": "Playwright", "contact_email": "a@acme.com"}"#;
        let record = parse_job_response(raw).unwrap().unwrap();
        assert_eq!(record.company, "Acme");
        assert_eq!(record.role, "QA Tester");
        assert_eq!(record.contact_email, "a@acme.com");
        assert!(record.relevant);
    }

    #[test]
    fn parse_not_relevant_response() {
        let raw = r#"{"relevant": false, "company": "", "role": ""}"#;
        assert!(parse_job_response(raw).unwrap().is_none());
    }

    #[test]
    fn parse_missing_relevant_means_not_relevant() {
        assert!(parse_job_response(r#"{"company": "Acme"}"#).unwrap().is_none());
    }

    #[test]
    fn parse_skills_list_is_joined() {
        let raw = r#"{"relevant": true, "skills": ["Selenium", " ", "API testing"]}"#;
        let record = parse_job_response(raw).unwrap().unwrap();
        assert_eq!(record.skills, "Selenium, API testing");
        assert_eq!(record.company, "");
    }

    #[test]
    fn parse_string_relevant_flag() {
        let raw = r#"{"relevant": "true", "company": "Acme"}"#;
        assert!(parse_job_response(raw).unwrap().is_some());
    }

    #[test]
    fn parse_response_wrapped_in_markdown() {
        let raw = "```json\n{\"relevant\": true, \"company\": \"Acme\"}\n```";
        let record = parse_job_response(raw).unwrap().unwrap();
        assert_eq!(record.company, "Acme");
    }

    #[test]
    fn parse_non_json_fails() {
        assert!(parse_job_response("Sorry, I cannot help with that.").is_err());
    }

    #[test]
    fn parse_json_array_fails() {
        assert!(parse_job_response("[1, 2]").is_err());
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "Here you go: {\"relevant\": false} done.";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }

    // ── LLM classifier with mock provider ───────────────────────────

    /// Mock LLM that returns a fixed response or error.
    struct MockExtractionLlm {
        response: Result<String, fn() -> LlmError>,
    }

    #[async_trait]
    impl LlmProvider for MockExtractionLlm {
        fn model_name(&self) -> &str {
            "mock-extraction"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 100,
                    output_tokens: 50,
                    finish_reason: FinishReason::Stop,
                }),
                Err(make) => Err(make()),
            }
        }
    }

    fn classifier(response: Result<String, fn() -> LlmError>) -> LlmClassifier {
        LlmClassifier::new(
            Arc::new(MockExtractionLlm { response }),
            vec!["qa".to_string()],
        )
        .with_retry(RetryPolicy::immediate(2))
    }

    #[tokio::test]
    async fn classifier_relevant() {
        let c = classifier(Ok(
            r#"{"relevant": true, "company": "Acme", "role": "QA Tester", "contact_email": "a@acme.com"}"#.into(),
        ));
        assert!(matches!(c.extract("QA job").await, Classification::Relevant(_)));
    }

    #[tokio::test]
    async fn classifier_malformed() {
        let c = classifier(Ok("not json at all".into()));
        assert!(matches!(c.extract("x").await, Classification::Malformed { .. }));
    }

    #[tokio::test]
    async fn classifier_transport_failure_is_transient() {
        let c = classifier(Err(|| LlmError::RequestFailed {
            provider: "mock".into(),
            reason: "timeout".into(),
        }));
        assert!(matches!(c.extract("x").await, Classification::Transient { .. }));
    }

    // ── Stage ───────────────────────────────────────────────────────

    fn relevant(company: &str) -> Classification {
        Classification::Relevant(JobRecord {
            company: company.into(),
            role: "QA Tester".into(),
            contact_email: format!("jobs@{}.com", company.to_lowercase()),
            relevant: true,
            ..Default::default()
        })
    }

    fn transient() -> Classification {
        Classification::Transient {
            reason: "rate limited".into(),
        }
    }

    #[tokio::test]
    async fn stage_stamps_date_and_sender() {
        let classifier = ScriptedClassifier::new([Classification::NotRelevant, relevant("Acme")]);
        let stage = ExtractionStage::new(Arc::new(classifier));
        let messages = vec![
            RawMessage::new("A", "hi", "t1"),
            RawMessage::new("B", "QA job at Acme, email a@acme.com", "t2"),
        ];

        let outcome = stage.run(&messages).await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].date, "t2");
        assert_eq!(outcome.records[0].sender, "B");
        assert!(outcome.retry_from.is_none());
    }

    #[tokio::test]
    async fn stage_reports_first_transient_for_retry() {
        let classifier =
            ScriptedClassifier::new([relevant("Acme"), transient(), relevant("Globex")]);
        let stage = ExtractionStage::new(Arc::new(classifier));
        let messages = vec![
            RawMessage::new("A", "job 1", "t1"),
            RawMessage::new("B", "job 2", "t2"),
            RawMessage::new("C", "job 3", "t3"),
        ];

        let outcome = stage.run(&messages).await;
        // Later messages still produce records.
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.retry_from, Some(messages[1].clone()));
        assert_eq!(outcome.transient, 1);
        assert!(!outcome.all_transient());
    }

    #[tokio::test]
    async fn stage_malformed_counts_as_processed() {
        let classifier = ScriptedClassifier::new([
            Classification::Malformed {
                reason: "bad json".into(),
            },
            Classification::NotRelevant,
        ]);
        let stage = ExtractionStage::new(Arc::new(classifier));
        let messages = vec![
            RawMessage::new("A", "??", "t1"),
            RawMessage::new("B", "hello", "t2"),
        ];

        let outcome = stage.run(&messages).await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.malformed, 1);
        assert!(outcome.retry_from.is_none());
    }

    #[tokio::test]
    async fn stage_all_transient() {
        let classifier = ScriptedClassifier::new([transient(), transient()]);
        let stage = ExtractionStage::new(Arc::new(classifier));
        let messages = vec![
            RawMessage::new("A", "x", "t1"),
            RawMessage::new("B", "y", "t2"),
        ];

        let outcome = stage.run(&messages).await;
        assert!(outcome.all_transient());
        assert_eq!(outcome.retry_from, Some(messages[0].clone()));
    }
}
