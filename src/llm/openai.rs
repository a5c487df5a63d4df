//! OpenAI-compatible chat completions provider.
//!
//! Works against api.openai.com and any compatible endpoint (configurable
//! base URL).

use crate::error::{LlmError, Result};
use crate::llm::{KeyRing, Provider};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Chat-completions provider over HTTP.
pub struct OpenAiProvider {
    http_client: reqwest::Client,
    base_url: String,
    keys: KeyRing,
    model: String,
}

impl OpenAiProvider {
    pub fn new(http_client: reqwest::Client, base_url: String, keys: KeyRing, model: String) -> Self {
        Self {
            http_client,
            base_url,
            keys,
            model,
        }
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let (key_index, api_key) = self.keys.checkout().await;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );

        let response = self
            .http_client
            .post(&url)
            .header("authorization", format!("Bearer {api_key}"))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::ProviderRequest(error.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.keys.report_rate_limited(key_index).await;
        }

        let response_text = response.text().await.map_err(|error| {
            LlmError::ProviderRequest(format!("failed to read response body: {error}"))
        })?;

        let response_body: serde_json::Value =
            serde_json::from_str(&response_text).map_err(|error| {
                LlmError::ProviderRequest(format!(
                    "response ({status}) is not valid JSON: {error}"
                ))
            })?;

        if !status.is_success() {
            let message = response_body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(LlmError::ProviderRequest(format!(
                "OpenAI API error ({status}): {message}"
            ))
            .into());
        }

        response_body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| LlmError::EmptyCompletion.into())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, cancel: &CancellationToken, prompt: &str) -> Result<String> {
        tokio::select! {
            _ = cancel.cancelled() => Err(crate::error::Error::Cancelled),
            result = self.request(prompt) => result,
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
