//! Pre-flight internet check for outreach.
//!
//! Outreach touches every eligible row. Offline, each send fails and each
//! row gets a FAILED mark, so the check runs first and aborts before any row
//! is touched.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Endpoints tried in order; the first answer below 500 passes.
pub const DEFAULT_CHECK_URLS: &[&str] = &[
    "https://www.google.com/generate_204",
    "https://docs.google.com",
    "https://smtp.gmail.com",
];

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(8);

pub struct ConnectivityCheck {
    client: Client,
    urls: Vec<String>,
}

impl ConnectivityCheck {
    pub fn new<S: Into<String>>(
        urls: impl IntoIterator<Item = S>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Connectivity(format!("HTTP client setup: {e}")))?;
        Ok(Self {
            client,
            urls: urls.into_iter().map(Into::into).collect(),
        })
    }

    pub fn with_defaults() -> Result<Self, PipelineError> {
        Self::new(DEFAULT_CHECK_URLS.iter().copied(), DEFAULT_CHECK_TIMEOUT)
    }

    /// `Ok` as soon as one endpoint answers; otherwise every failure is
    /// listed in the error.
    pub async fn ensure(&self) -> Result<(), PipelineError> {
        let mut failures = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            match self.client.get(url).send().await {
                Ok(resp) if !resp.status().is_server_error() => {
                    info!(url = %url, status = resp.status().as_u16(), "Internet check passed");
                    return Ok(());
                }
                Ok(resp) => failures.push(format!("{url} -> HTTP {}", resp.status().as_u16())),
                Err(e) => failures.push(format!("{url} -> {e}")),
            }
            debug!(url = %url, "Connectivity check failed");
        }
        Err(PipelineError::Connectivity(failures.join(" | ")))
    }
}
