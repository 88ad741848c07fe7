//! OpenAI-compatible provider implementation.
//!
//! [`OpenAiCompatProvider`] works with any API that follows the OpenAI
//! chat completion format; point `base_url` at the endpoint of your
//! choice.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse};

/// Configuration for an OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider name, used in logs.
    pub name: String,
    /// API base URL (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    /// Environment variable holding the API key when no explicit key is
    /// supplied.
    pub api_key_env: String,
    /// Extra headers attached to every request.
    pub headers: HashMap<String, String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// An LLM provider that uses the OpenAI-compatible chat completion API.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    /// Create a new provider from configuration.
    ///
    /// The API key is resolved from `config.api_key_env` at request time.
    pub fn new(config: ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            api_key: None,
        }
    }

    /// Create a new provider with an explicit API key.
    pub fn with_api_key(config: ProviderConfig, api_key: String) -> Self {
        let mut provider = Self::new(config);
        provider.api_key = Some(api_key);
        provider
    }

    /// Returns the chat completions endpoint URL.
    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Resolve the API key: explicit key > environment variable.
    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.config.api_key_env).map_err(|_| {
            ProviderError::NotConfigured(format!("set {} env var", self.config.api_key_env))
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_key = self.resolve_api_key()?;
        let url = self.completions_url();

        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");

        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.json(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                429 => {
                    let retry_ms = parse_retry_after_ms(&body).unwrap_or(1000);
                    warn!(
                        provider = %self.config.name,
                        retry_after_ms = retry_ms,
                        "rate limited"
                    );
                    ProviderError::RateLimited {
                        retry_after_ms: retry_ms,
                    }
                }
                401 | 403 => ProviderError::AuthFailed(body),
                404 => {
                    ProviderError::ModelNotFound(format!("model '{}': {body}", request.model))
                }
                _ => ProviderError::RequestFailed(format!("HTTP {status}: {body}")),
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse response: {e}")))?;

        debug!(
            provider = %self.config.name,
            model = %chat_response.model,
            choices = chat_response.choices.len(),
            "chat completion response received"
        );

        Ok(chat_response)
    }
}

/// Extract a retry-after hint from an error body, in milliseconds.
///
/// Providers phrase this differently; we look for a JSON
/// `error.retry_after` (seconds) or give up.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = value
        .get("error")
        .and_then(|e| e.get("retry_after"))
        .and_then(|v| v.as_f64())?;
    Some((secs * 1000.0) as u64)
}
