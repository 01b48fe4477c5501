//! OpenRouter provider — OpenAI-compatible chat completions over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "openrouter";

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Per-request timeout. The core never waits on the model longer than this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenRouterProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    site_url: Option<String>,
    site_name: Option<String>,
}

impl OpenRouterProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            site_url: None,
            site_name: None,
        })
    }

    /// Set a custom base URL (proxies, self-hosted gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// OpenRouter attribution headers. Empty values are not sent.
    pub fn with_attribution(mut self, site_url: &str, site_name: &str) -> Self {
        self.site_url = Some(site_url.trim().to_string()).filter(|s| !s.is_empty());
        self.site_name = Some(site_name.trim().to_string()).filter(|s| !s.is_empty());
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body);
        if let Some(ref url) = self.site_url {
            builder = builder.header("HTTP-Referer", url);
        }
        if let Some(ref name) = self.site_name {
            builder = builder.header("X-OpenRouter-Title", name);
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        let usage = parsed.usage.unwrap_or(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response has no choices".to_string(),
            })?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            _ => FinishReason::Other,
        };
        debug!(
            model = %self.model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason,
        })
    }
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> LlmError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        _ => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(300).collect::<String>()
            ),
        },
    }
}
