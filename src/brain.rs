//! The brain: prompt assembly and ordered provider failover.
//!
//! The brain hides the concrete provider chain behind two generation entry
//! points, enriches prompts with long-term memory, and applies the context
//! window when one is configured. Retry/backoff lives inside each provider;
//! the failover loop here only sequences them.

use crate::context::ContextManager;
use crate::error::{Error, LlmError, ProviderFailures, Result};
use crate::llm::Provider;
use crate::memory::MemoryStore;
use crate::message::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Prompt-assembly and provider-orchestration core.
pub struct Brain {
    providers: Vec<Arc<dyn Provider>>,
    memory: Option<Arc<MemoryStore>>,
    context: Option<ContextManager>,
}

/// Constructor-injected builder for [`Brain`].
#[derive(Default)]
pub struct BrainBuilder {
    providers: Vec<Arc<dyn Provider>>,
    memory: Option<Arc<MemoryStore>>,
    context: Option<ContextManager>,
}

impl BrainBuilder {
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: Vec<Arc<dyn Provider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn context_manager(mut self, context: ContextManager) -> Self {
        self.context = Some(context);
        self
    }

    /// Build the brain. The provider list must be non-empty.
    pub fn build(self) -> Result<Brain> {
        if self.providers.is_empty() {
            return Err(LlmError::NoProviders.into());
        }
        Ok(Brain {
            providers: self.providers,
            memory: self.memory,
            context: self.context,
        })
    }
}

impl Brain {
    pub fn builder() -> BrainBuilder {
        BrainBuilder::default()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Generate a completion for a bare prompt.
    ///
    /// Long-term memory, when configured and readable, is prepended as a
    /// `[Long-term Memory]` block. Memory failures are logged and the
    /// original prompt proceeds unchanged.
    pub async fn generate(&self, cancel: &CancellationToken, prompt: &str) -> Result<String> {
        let memory = self.load_memory().await;
        let enriched = if memory.is_empty() {
            prompt.to_string()
        } else {
            format!("[Long-term Memory]\n{memory}\n\n{prompt}")
        };
        self.run_providers(cancel, &enriched).await
    }

    /// Generate from a message history plus a system prompt.
    ///
    /// The effective system prompt is composed with memory, the history is
    /// fitted to the context window when a manager is configured (context
    /// errors propagate verbatim), and the result is flattened into a single
    /// prompt in message order.
    pub async fn generate_with_context(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        system_prompt: &str,
    ) -> Result<String> {
        let memory = self.load_memory().await;
        let effective_system = match (system_prompt.is_empty(), memory.is_empty()) {
            (false, false) => format!("{system_prompt}\n\n[Long-term Memory]\n{memory}"),
            (false, true) => system_prompt.to_string(),
            (true, false) => format!("[Long-term Memory]\n{memory}"),
            (true, true) => String::new(),
        };

        let fitted: Vec<Message> = match &self.context {
            Some(context) => context.fit_to_window(messages, &effective_system)?,
            None => messages.to_vec(),
        };

        let mut prompt = String::new();
        if !effective_system.is_empty() {
            prompt.push_str(&effective_system);
            prompt.push_str("\n\n");
        }
        for message in &fitted {
            prompt.push_str(&format!("{}: {}\n", message.role, message.canonical_text()));
        }

        self.run_providers(cancel, &prompt).await
    }

    async fn load_memory(&self) -> String {
        let Some(memory) = &self.memory else {
            return String::new();
        };
        match memory.load().await {
            Ok(contents) => contents.trim_end().to_string(),
            Err(error) => {
                tracing::warn!(%error, "failed to load long-term memory, proceeding without it");
                String::new()
            }
        }
    }

    /// Try providers strictly in declared order.
    ///
    /// Cancellation stops the walk immediately. Every other failure is
    /// logged and the next provider tried; when the chain is exhausted the
    /// aggregate carries every underlying error. A chain of one returns the
    /// primary's error unwrapped.
    async fn run_providers(&self, cancel: &CancellationToken, prompt: &str) -> Result<String> {
        let mut failures = Vec::new();

        for (index, provider) in self.providers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match provider.generate(cancel, prompt).await {
                Ok(text) => {
                    if index > 0 {
                        tracing::info!(
                            provider = provider.name(),
                            index,
                            "fallback provider succeeded"
                        );
                    }
                    return Ok(text);
                }
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        provider = provider.name(),
                        index,
                        %error,
                        "provider failed"
                    );
                    failures.push(error);
                }
            }
        }

        if self.providers.len() == 1 {
            return Err(failures
                .pop()
                .unwrap_or_else(|| LlmError::NoProviders.into()));
        }
        Err(LlmError::AllProvidersFailed(ProviderFailures(failures)).into())
    }
}

impl std::fmt::Debug for Brain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brain")
            .field("providers", &self.providers.len())
            .field("memory", &self.memory.is_some())
            .field("context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::tokenizer::Tokenizer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    enum Behavior {
        Reply(&'static str),
        Fail(&'static str),
        CancelCtx,
    }

    struct ScriptedProvider {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, cancel: &CancellationToken, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Reply(text) => Ok((*text).to_string()),
                Behavior::Fail(message) => {
                    Err(LlmError::ProviderRequest((*message).to_string()).into())
                }
                Behavior::CancelCtx => {
                    cancel.cancel();
                    Err(Error::Cancelled)
                }
            }
        }
    }

    /// Provider that echoes its prompt, for asserting on assembly.
    struct PromptEcho;

    #[async_trait]
    impl Provider for PromptEcho {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _cancel: &CancellationToken, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }
    }

    #[tokio::test]
    async fn fallback_runs_each_provider_once() {
        let primary = ScriptedProvider::new("a", Behavior::Fail("a down"));
        let fallback = ScriptedProvider::new("b", Behavior::Reply("b-reply"));
        let brain = Brain::builder()
            .provider(primary.clone())
            .provider(fallback.clone())
            .build()
            .unwrap();

        let text = brain
            .generate(&CancellationToken::new(), "hi")
            .await
            .unwrap();
        assert_eq!(text, "b-reply");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_aggregates_every_error() {
        let primary = ScriptedProvider::new("a", Behavior::Fail("a down"));
        let fallback = ScriptedProvider::new("b", Behavior::Fail("b down"));
        let brain = Brain::builder()
            .provider(primary)
            .provider(fallback)
            .build()
            .unwrap();

        let error = brain
            .generate(&CancellationToken::new(), "hi")
            .await
            .unwrap_err();
        let rendered = error.to_string();
        assert!(rendered.contains("all 2 providers failed"), "{rendered}");
        assert!(rendered.contains("a down"), "{rendered}");
        assert!(rendered.contains("b down"), "{rendered}");
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_chain() {
        let primary = ScriptedProvider::new("a", Behavior::CancelCtx);
        let fallback = ScriptedProvider::new("b", Behavior::Reply("never"));
        let brain = Brain::builder()
            .provider(primary.clone())
            .provider(fallback.clone())
            .build()
            .unwrap();

        let error = brain
            .generate(&CancellationToken::new(), "hi")
            .await
            .unwrap_err();
        assert!(error.is_cancellation());
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn single_provider_error_is_unwrapped() {
        let primary = ScriptedProvider::new("a", Behavior::Fail("a down"));
        let brain = Brain::builder().provider(primary).build().unwrap();

        let error = brain
            .generate(&CancellationToken::new(), "hi")
            .await
            .unwrap_err();
        let rendered = error.to_string();
        assert!(!rendered.contains("providers failed"), "{rendered}");
        assert!(rendered.contains("a down"), "{rendered}");
    }

    #[tokio::test]
    async fn memory_is_prepended_when_present() {
        let dir = tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(dir.path()));
        memory.remember("likes Rust").await.unwrap();

        let brain = Brain::builder()
            .provider(Arc::new(PromptEcho))
            .memory(memory)
            .build()
            .unwrap();

        let prompt = brain
            .generate(&CancellationToken::new(), "what do I like?")
            .await
            .unwrap();
        assert_eq!(prompt, "[Long-term Memory]\n- likes Rust\n\nwhat do I like?");
    }

    #[tokio::test]
    async fn unreadable_memory_proceeds_with_original_prompt() {
        let dir = tempdir().unwrap();
        // Root is a file, so reading <root>/memory.md fails with a real error.
        let bogus_root = dir.path().join("not-a-dir");
        tokio::fs::write(&bogus_root, b"x").await.unwrap();

        let brain = Brain::builder()
            .provider(Arc::new(PromptEcho))
            .memory(Arc::new(MemoryStore::new(bogus_root)))
            .build()
            .unwrap();

        let prompt = brain
            .generate(&CancellationToken::new(), "plain")
            .await
            .unwrap();
        assert_eq!(prompt, "plain");
    }

    #[tokio::test]
    async fn context_generation_flattens_in_message_order() {
        let brain = Brain::builder().provider(Arc::new(PromptEcho)).build().unwrap();

        let messages = vec![
            Message::text(Role::User, "first question"),
            Message::text(Role::Assistant, "first answer"),
            Message::text(Role::User, "second question"),
        ];
        let prompt = brain
            .generate_with_context(&CancellationToken::new(), &messages, "Be brief.")
            .await
            .unwrap();

        assert!(prompt.starts_with("Be brief.\n\n"));
        let user_1 = prompt.find("user: first question").unwrap();
        let assistant = prompt.find("assistant: first answer").unwrap();
        let user_2 = prompt.find("user: second question").unwrap();
        assert!(user_1 < assistant && assistant < user_2);
    }

    #[tokio::test]
    async fn context_manager_trims_before_flattening() {
        let tokenizer = Arc::new(Tokenizer::new("cl100k_base").unwrap());
        let context = ContextManager::new(tokenizer, 24);
        let brain = Brain::builder()
            .provider(Arc::new(PromptEcho))
            .context_manager(context)
            .build()
            .unwrap();

        let messages: Vec<Message> = (0..20)
            .map(|index| Message::text(Role::User, format!("filler message number {index}")))
            .collect();
        let prompt = brain
            .generate_with_context(&CancellationToken::new(), &messages, "sys")
            .await
            .unwrap();

        assert!(!prompt.contains("filler message number 0"));
        assert!(prompt.contains("filler message number 19"));
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        assert!(Brain::builder().build().is_err());
    }
}
