//! Bounded retry with exponential backoff for transient provider failures.

use std::time::Duration;

use tracing::warn;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Call `complete`, retrying transient failures. Non-transient errors return at once.
pub(crate) async fn complete_with_retry(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
    policy: RetryPolicy,
) -> Result<CompletionResponse, LlmError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match provider.complete(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = match &e {
                    LlmError::RateLimited {
                        retry_after: Some(after),
                        ..
                    } => (*after).max(policy.delay_after(attempt)),
                    _ => policy.delay_after(attempt),
                };
                warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "LLM call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
