//! LLM providers behind a uniform generation interface.

pub mod anthropic;
pub mod keys;
pub mod openai;
pub mod retry;

pub use keys::KeyRing;
pub use retry::RetryProvider;

use crate::config::{BrainConfig, RetryConfig};
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Uniform generation interface. Everything else about a provider is opaque.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name for logs ("echo", "openai", "anthropic").
    fn name(&self) -> &str;

    /// Map a prompt string to a completion string.
    async fn generate(&self, cancel: &CancellationToken, prompt: &str) -> Result<String>;
}

/// Local provider that completes with the prompt itself. Used by tests and
/// as an offline fallback of last resort.
#[derive(Debug, Default)]
pub struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, cancel: &CancellationToken, prompt: &str) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(crate::error::Error::Cancelled);
        }
        Ok(prompt.to_string())
    }
}

/// Credentials handed to network providers at construction time.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub api_keys: Vec<String>,
    pub base_url: Option<String>,
}

/// Build one provider from its kind string, retry-wrapped per policy.
///
/// Retry is applied here, at construction, so the brain's failover loop
/// never has to know about backoff.
pub fn build_provider(
    kind: &str,
    model: &str,
    credentials: &ProviderCredentials,
    retry: RetryConfig,
    http_client: reqwest::Client,
) -> Result<Arc<dyn Provider>> {
    let inner: Arc<dyn Provider> = match kind {
        "echo" => Arc::new(EchoProvider),
        "openai" => Arc::new(openai::OpenAiProvider::new(
            http_client,
            credentials
                .base_url
                .clone()
                .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
            KeyRing::new(kind, credentials.api_keys.clone())?,
            model.to_string(),
        )),
        "anthropic" => Arc::new(anthropic::AnthropicProvider::new(
            http_client,
            credentials
                .base_url
                .clone()
                .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string()),
            KeyRing::new(kind, credentials.api_keys.clone())?,
            model.to_string(),
        )),
        other => return Err(LlmError::UnknownProviderKind(other.to_string()).into()),
    };

    // The echo provider cannot fail transiently; wrapping it only slows tests.
    if kind == "echo" {
        return Ok(inner);
    }
    Ok(Arc::new(RetryProvider::new(inner, retry)))
}

/// Build the full ordered provider chain (primary, then fallbacks) from
/// brain configuration.
pub fn build_provider_chain(
    config: &BrainConfig,
    credentials_for: impl Fn(&str) -> ProviderCredentials,
    http_client: reqwest::Client,
) -> Result<Vec<Arc<dyn Provider>>> {
    let mut chain = Vec::with_capacity(1 + config.fallbacks.len());
    chain.push(build_provider(
        &config.provider_kind,
        &config.default_model,
        &credentials_for(&config.provider_kind),
        config.retry,
        http_client.clone(),
    )?);
    for fallback in &config.fallbacks {
        chain.push(build_provider(
            &fallback.provider_kind,
            &fallback.default_model,
            &credentials_for(&fallback.provider_kind),
            config.retry,
            http_client.clone(),
        )?);
    }
    Ok(chain)
}
