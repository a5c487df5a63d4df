//! Retry wrapper: exponential backoff around any provider.

use crate::config::RetryConfig;
use crate::error::Result;
use crate::llm::Provider;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retries a wrapped provider with exponential backoff.
///
/// Cancellation and deadline errors are returned immediately, never retried.
/// Applied at provider construction so failover stays retry-free.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    policy: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let initial = self.policy.initial_backoff_ms as f64;
        let backoff = initial * self.policy.multiplier.powi(attempt as i32);
        let capped = backoff.min(self.policy.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, cancel: &CancellationToken, prompt: &str) -> Result<String> {
        let attempts = self.policy.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.inner.generate(cancel, prompt).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => {
                    if attempt + 1 < attempts {
                        let backoff = self.backoff_for(attempt);
                        tracing::warn!(
                            provider = self.inner.name(),
                            attempt = attempt + 1,
                            attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            %error,
                            "provider request failed, retrying"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(crate::error::Error::Cancelled),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            crate::error::LlmError::ProviderRequest("no attempts were made".into()).into()
        }))
    }
}

impl std::fmt::Debug for RetryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryProvider")
            .field("provider", &self.inner.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
