//! API key rotation with per-credential rate-limit cooldown.

use crate::error::{LlmError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Ordered set of credentials for one provider.
///
/// `checkout` hands out the next key that is not cooling down, round-robin
/// so a multi-key deployment spreads load. A key reported rate-limited is
/// skipped until its cooldown lapses; when every key is cooling down the
/// least-recently-limited one is reused rather than failing outright.
pub struct KeyRing {
    provider: String,
    keys: Vec<String>,
    next: AtomicUsize,
    cooldowns: RwLock<HashMap<usize, Instant>>,
    cooldown: Duration,
}

impl KeyRing {
    pub fn new(provider: &str, keys: Vec<String>) -> Result<Self> {
        let keys: Vec<String> = keys.into_iter().filter(|key| !key.is_empty()).collect();
        if keys.is_empty() {
            return Err(LlmError::MissingProviderKey(provider.to_string()).into());
        }
        Ok(Self {
            provider: provider.to_string(),
            keys,
            next: AtomicUsize::new(0),
            cooldowns: RwLock::new(HashMap::new()),
            cooldown: DEFAULT_COOLDOWN,
        })
    }

    #[cfg(test)]
    fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Check out a key index + value for one request.
    pub async fn checkout(&self) -> (usize, String) {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let cooldowns = self.cooldowns.read().await;

        for offset in 0..self.keys.len() {
            let index = (start + offset) % self.keys.len();
            let cooling = cooldowns
                .get(&index)
                .is_some_and(|limited_at| limited_at.elapsed() < self.cooldown);
            if !cooling {
                return (index, self.keys[index].clone());
            }
        }

        // Every key is cooling down; fall back to the stalest one.
        let index = cooldowns
            .iter()
            .min_by_key(|(_, limited_at)| *limited_at)
            .map(|(index, _)| *index)
            .unwrap_or(start % self.keys.len());
        tracing::warn!(
            provider = %self.provider,
            "all API keys in rate-limit cooldown, reusing the stalest"
        );
        (index, self.keys[index].clone())
    }

    /// Record a rate-limit response for the key at `index`.
    pub async fn report_rate_limited(&self, index: usize) {
        self.cooldowns.write().await.insert(index, Instant::now());
        tracing::warn!(
            provider = %self.provider,
            key_index = index,
            "API key rate limited, entering cooldown"
        );
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("provider", &self.provider)
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}
