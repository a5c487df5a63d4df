//! Adaptive context windowing.
//!
//! Fits a conversation tail plus system prompt into a model's token budget by
//! walking the history from newest to oldest and keeping the longest suffix
//! that still fits. Messages are whole units: one that would overflow the
//! remaining budget is dropped, never truncated.

use crate::error::Result;
use crate::message::Message;
use crate::tokenizer::TokenCounter;
use std::sync::Arc;

/// Token-budgeted sliding window over a message history.
pub struct ContextManager {
    counter: Arc<dyn TokenCounter>,
    window_tokens: usize,
}

impl ContextManager {
    pub fn new(counter: Arc<dyn TokenCounter>, window_tokens: usize) -> Self {
        Self {
            counter,
            window_tokens,
        }
    }

    pub fn window_tokens(&self) -> usize {
        self.window_tokens
    }

    /// Return the longest suffix of `messages` that fits the window together
    /// with the system prompt, in original chronological order.
    ///
    /// Greedy from newest, stop on first overflow. A system prompt that
    /// alone meets or exceeds the budget yields an empty list, not an error.
    pub fn fit_to_window(
        &self,
        messages: &[Message],
        system_prompt: &str,
    ) -> Result<Vec<Message>> {
        let system_tokens = self.counter.count_tokens(system_prompt)?;
        if system_tokens >= self.window_tokens {
            tracing::warn!(
                system_tokens,
                window_tokens = self.window_tokens,
                "system prompt alone fills the context window"
            );
            return Ok(Vec::new());
        }

        let budget = self.window_tokens - system_tokens;
        let mut used = 0usize;
        let mut kept = 0usize;

        for message in messages.iter().rev() {
            let tokens = self.counter.count_tokens(&message.canonical_text())?;
            if used + tokens > budget {
                break;
            }
            used += tokens;
            kept += 1;
        }

        if kept < messages.len() {
            tracing::debug!(
                dropped = messages.len() - kept,
                kept,
                used_tokens = used + system_tokens,
                window_tokens = self.window_tokens,
                "trimmed conversation to fit context window"
            );
        }

        Ok(messages[messages.len() - kept..].to_vec())
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("window_tokens", &self.window_tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::message::Role;
    use crate::tokenizer::Tokenizer;

    struct FailingCounter;

    impl TokenCounter for FailingCounter {
        fn count_tokens(&self, _text: &str) -> Result<usize> {
            Err(LlmError::UnknownEncoding("broken".into()).into())
        }
    }

    fn conversation(len: usize) -> Vec<Message> {
        (1..=len)
            .map(|index| {
                let role = if index % 2 == 1 {
                    Role::User
                } else {
                    Role::Assistant
                };
                Message::text(
                    role,
                    format!("This is message number {index} in our conversation about Go programming"),
                )
            })
            .collect()
    }

    fn manager(window_tokens: usize) -> ContextManager {
        let tokenizer = Arc::new(Tokenizer::new("cl100k_base").unwrap());
        ContextManager::new(tokenizer, window_tokens)
    }

    #[test]
    fn keeps_a_fitting_suffix_in_order() {
        let manager = manager(200);
        let messages = conversation(50);
        let system = "You are a helpful assistant.";

        let fitted = manager.fit_to_window(&messages, system).unwrap();
        assert!(!fitted.is_empty());
        assert!(fitted.len() < messages.len(), "expected older messages dropped");

        // Result is a suffix of the input in original order.
        let offset = messages.len() - fitted.len();
        for (index, message) in fitted.iter().enumerate() {
            assert_eq!(message.id, messages[offset + index].id);
        }

        // Total token count including system stays within the window.
        let tokenizer = Tokenizer::new("cl100k_base").unwrap();
        let mut total = tokenizer.count_tokens(system).unwrap();
        for message in &fitted {
            total += tokenizer.count_tokens(&message.canonical_text()).unwrap();
        }
        assert!(total <= 200, "window exceeded: {total}");

        // Prepending the newest dropped message would overflow.
        let next_older = &messages[offset - 1];
        total += tokenizer
            .count_tokens(&next_older.canonical_text())
            .unwrap();
        assert!(total > 200, "dropped message would have fit: {total}");
    }

    #[test]
    fn huge_single_message_is_dropped() {
        let manager = manager(100);
        let word = "context ";
        let message = Message::text(Role::User, word.repeat(500));

        let fitted = manager.fit_to_window(&[message], "").unwrap();
        assert!(fitted.is_empty());
    }

    #[test]
    fn oversized_system_prompt_yields_empty_list() {
        let manager = manager(4);
        let messages = conversation(3);
        let fitted = manager
            .fit_to_window(&messages, "a very long system prompt that cannot fit at all")
            .unwrap();
        assert!(fitted.is_empty());
    }

    #[test]
    fn everything_kept_when_budget_allows() {
        let manager = manager(100_000);
        let messages = conversation(10);
        let fitted = manager.fit_to_window(&messages, "sys").unwrap();
        assert_eq!(fitted.len(), 10);
        assert_eq!(fitted[0].id, messages[0].id);
    }

    #[test]
    fn tokenizer_errors_propagate() {
        let manager = ContextManager::new(Arc::new(FailingCounter), 100);
        let messages = conversation(1);
        assert!(manager.fit_to_window(&messages, "sys").is_err());
    }
}
