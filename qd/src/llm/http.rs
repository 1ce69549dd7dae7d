//! HTTP client for the completion endpoint
//!
//! Speaks the chat-completions wire shape: `{model, messages, max_tokens,
//! temperature}` in, `{choices:[{message:{content}}], usage}` out.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::LlmConfig;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError};

/// HTTP LLM client
pub struct HttpLlmClient {
    url: String,
    model: String,
    api_key: Option<String>,
    http: Client,
    timeout: Duration,
    research_timeout: Duration,
    max_attempts: u32,
}

impl HttpLlmClient {
    /// Create a new client from configuration
    ///
    /// The API key env var is optional: a missing variable means requests
    /// go out without a bearer token (local endpoints).
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        let timeout = Duration::from_millis(config.timeout_ms);
        let research_timeout = Duration::from_millis(config.research_timeout_ms);

        let http = Client::builder().build().map_err(LlmError::Network)?;

        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            http,
            timeout,
            research_timeout,
            max_attempts: config.max_attempts.max(1),
        })
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature(),
        })
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let timeout = if request.role.is_research_adjacent() {
            self.research_timeout
        } else {
            self.timeout
        };

        let mut builder = self
            .http
            .post(&self.url)
            .timeout(timeout)
            .json(&self.build_request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(timeout)
            } else {
                LlmError::Network(e)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30));
            return Err(LlmError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(LlmError::Network)?;
        let content = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("Response has no choices".to_string()))?;

        let usage = api_response.usage.unwrap_or_default();
        Ok(CompletionResponse {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(role = %request.role, max_tokens = request.max_tokens, "HttpLlmClient::complete: called");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let base = e.retry_after().unwrap_or(Duration::from_secs(2 * attempt as u64));
                    let jitter_ms = rand::rng().random_range(0..500);
                    let delay = base + Duration::from_millis(jitter_ms);
                    warn!(attempt, error = %e, ?delay, "LLM call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
