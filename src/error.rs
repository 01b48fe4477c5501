//! Error types for jobfeed.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the pipeline binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Local state files: cursor, sent tracker, staging record, lock.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize state for {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Lock file {path} unusable: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    /// Transport-level failures worth retrying on the next run.
    ///
    /// An unparseable completion body is not transient: the same prompt at
    /// temperature 0 yields the same garbage.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::AuthFailed { .. }
        )
    }
}

/// Spreadsheet service errors.
#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("Sheet request failed: {0}")]
    Request(String),

    #[error("Sheet API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected sheet response: {0}")]
    InvalidResponse(String),

    #[error("Column {0} not present in sheet header")]
    MissingColumn(String),
}

/// Mail transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("SMTP send failed: {0}")]
    Transport(String),
}

/// Scrape capability errors.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Scraper unavailable: {0}")]
    Unavailable(String),

    #[error("Scrape staging record unreadable: {0}")]
    Staging(#[from] PersistenceError),
}

/// Stage-level pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Sheet write aborted after {appended} row(s): {source}")]
    SheetWrite { appended: usize, source: SheetError },

    #[error("Classifier unreachable: all {attempted} message(s) failed transiently")]
    ClassifierUnreachable { attempted: usize },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Internet connectivity check failed: {0}")]
    Connectivity(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),
}
