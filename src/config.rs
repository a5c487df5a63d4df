//! Runtime configuration surface.
//!
//! Plain serde structs injected into the core at construction time. Concrete
//! file formats, env bindings, and flag names belong to the binary, not here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Full configuration consumed by the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Brain and provider-chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Primary provider kind ("echo", "openai", "anthropic").
    #[serde(default = "default_provider_kind")]
    pub provider_kind: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Ordered fallback providers, tried after the primary fails.
    #[serde(default)]
    pub fallbacks: Vec<FallbackConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Root directory of the long-term memory store. Empty disables memory.
    #[serde(default)]
    pub memory_path: Option<PathBuf>,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            provider_kind: default_provider_kind(),
            default_model: default_model(),
            fallbacks: Vec::new(),
            retry: RetryConfig::default(),
            memory_path: None,
        }
    }
}

/// One fallback entry in the provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub provider_kind: String,
    #[serde(default = "default_model")]
    pub default_model: String,
}

/// Exponential backoff policy applied to each network provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Context window configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
        }
    }
}

/// Tokenizer selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
        }
    }
}

/// Scheduler preload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// One preloaded scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub cron: String,
    pub prompt: String,
}

fn default_provider_kind() -> String {
    "echo".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_window_tokens() -> usize {
    8192
}

fn default_encoding() -> String {
    "cl100k_base".to_string()
}
