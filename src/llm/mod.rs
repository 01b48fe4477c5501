//! LLM integration for jobfeed.
//!
//! The classifier talks to any `LlmProvider`. The shipped backend is
//! OpenRouter's OpenAI-compatible chat-completions endpoint.

pub mod openrouter;
pub mod provider;
pub(crate) mod retry;

pub use openrouter::OpenRouterProvider;
pub use provider::*;
pub use retry::RetryPolicy;

use std::sync::Arc;

use tracing::info;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub site_url: String,
    pub site_name: String,
    /// Override for the OpenRouter base URL.
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let mut provider = OpenRouterProvider::new(config.api_key.clone(), &config.model)?
        .with_attribution(&config.site_url, &config.site_name);
    if let Some(ref url) = config.base_url {
        provider = provider.with_base_url(url);
    }
    info!("Using OpenRouter (model: {})", config.model);
    Ok(Arc::new(provider))
}

/// Send the provider a tiny prompt. Returns the first 120 chars of the reply.
pub async fn health_check(provider: &dyn LlmProvider, prompt: &str) -> Result<String, LlmError> {
    let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]).with_temperature(0.0);
    let response = provider.complete(request).await?;
    Ok(response.content.chars().take(120).collect())
}
