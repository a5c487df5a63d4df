//! Anthropic messages API provider.

use crate::error::{LlmError, Result};
use crate::llm::{KeyRing, Provider};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Messages-API provider over HTTP.
pub struct AnthropicProvider {
    http_client: reqwest::Client,
    base_url: String,
    keys: KeyRing,
    model: String,
}

impl AnthropicProvider {
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
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
                "Anthropic API error ({status}): {message}"
            ))
            .into());
        }

        // Concatenate all text blocks in the response content.
        let text = response_body["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block["type"] == "text")
                    .filter_map(|block| block["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::EmptyCompletion.into());
        }
        Ok(text)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, cancel: &CancellationToken, prompt: &str) -> Result<String> {
        tokio::select! {
            _ = cancel.cancelled() => Err(crate::error::Error::Cancelled),
            result = self.request(prompt) => result,
        }
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
