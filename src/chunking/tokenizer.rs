/// Hugging Face tokenizer backed token counting
use super::{ChunkError, TokenCounter};
use std::path::Path;
use tokenizers::Tokenizer;

/// Counts tokens with the embedding model's own tokenizer
///
/// Truncation and padding are disabled so long inputs are counted in full.
/// Counts include the special tokens ([CLS], [SEP], ...) the model sees
/// around every input.
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
    special_tokens: usize,
}

impl HfTokenCounter {
    /// Fetch the tokenizer for a Hugging Face model id (cached locally)
    pub fn from_pretrained(model: &str) -> Result<Self, ChunkError> {
        tracing::info!("Loading tokenizer for {}", model);
        let tokenizer = Tokenizer::from_pretrained(model, None)
            .map_err(|e| ChunkError::TokenizerLoad(format!("{}: {}", model, e)))?;
        Self::prepare(tokenizer)
    }

    /// Load a tokenizer.json from disk
    pub fn from_file(path: &Path) -> Result<Self, ChunkError> {
        tracing::info!("Loading tokenizer from {}", path.display());
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| ChunkError::TokenizerLoad(format!("{}: {}", path.display(), e)))?;
        Self::prepare(tokenizer)
    }

    fn prepare(mut tokenizer: Tokenizer) -> Result<Self, ChunkError> {
        tokenizer
            .with_truncation(None)
            .map_err(|e| ChunkError::TokenizerLoad(e.to_string()))?;
        tokenizer.with_padding(None);

        let special_tokens = tokenizer
            .encode("", true)
            .map(|encoding| encoding.len())
            .map_err(|e| ChunkError::TokenizerLoad(e.to_string()))?;
        Ok(Self {
            tokenizer,
            special_tokens,
        })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, ChunkError> {
        self.tokenizer
            .encode(text, true)
            .map(|encoding| encoding.len())
            .map_err(|e| ChunkError::Tokenizer(e.to_string()))
    }

    fn special_tokens(&self) -> usize {
        self.special_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires tokenizer download - run with: cargo test -- --ignored
    fn test_counts_include_special_tokens() {
        let counter = HfTokenCounter::from_pretrained("BAAI/bge-small-en-v1.5").unwrap();
        // [CLS] and [SEP]
        assert_eq!(counter.special_tokens(), 2);
        assert_eq!(counter.count_tokens("").unwrap(), 2);
        assert!(counter.count_tokens("The Minister may make rules.").unwrap() >= 7);
    }

    #[test]
    #[ignore] // Requires tokenizer download - run with: cargo test -- --ignored
    fn test_long_input_is_not_truncated() {
        let counter = HfTokenCounter::from_pretrained("BAAI/bge-small-en-v1.5").unwrap();
        let text = "word ".repeat(2000);
        assert!(counter.count_tokens(&text).unwrap() >= 2002);
    }

    #[test]
    fn test_missing_tokenizer_file() {
        let result = HfTokenCounter::from_file(Path::new("/nonexistent/tokenizer.json"));
        assert!(matches!(result, Err(ChunkError::TokenizerLoad(_))));
    }
}
