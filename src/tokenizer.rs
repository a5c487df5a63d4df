//! Token counting on top of tiktoken BPE encodings.

use crate::error::{LlmError, Result};
use tiktoken_rs::CoreBPE;

/// Counting seam used by the context manager.
///
/// The production implementation is [`Tokenizer`]; tests inject failing or
/// fixed-cost counters through this trait instead of patching globals.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<usize>;
}

/// BPE tokenizer for a named encoding.
pub struct Tokenizer {
    encoding: String,
    bpe: CoreBPE,
}

impl Tokenizer {
    /// Build a tokenizer for an encoding name such as `cl100k_base`.
    pub fn new(encoding: &str) -> Result<Self> {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            other => return Err(LlmError::UnknownEncoding(other.to_string()).into()),
        }
        .map_err(|error| anyhow::anyhow!("failed to load {encoding} encoding: {error}"))?;

        Ok(Self {
            encoding: encoding.to_string(),
            bpe,
        })
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }
}

impl TokenCounter for Tokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_cl100k_tokens() {
        let tokenizer = Tokenizer::new("cl100k_base").unwrap();
        let count = tokenizer
            .count_tokens("This is message number 1 in our conversation about Go programming")
            .unwrap();
        assert!(count > 5 && count < 30, "unexpected count {count}");
        assert_eq!(tokenizer.count_tokens("").unwrap(), 0);
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let error = Tokenizer::new("quantum_base").unwrap_err();
        assert!(error.to_string().contains("quantum_base"));
    }
}
