use crate::error::{PipelineError, Result};
use std::path::Path;
use tokenizers::{TruncationDirection, TruncationParams, TruncationStrategy};

pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub trait Tokenizer: Send + Sync {
    /// Converts a text string into a sequence of tokens, special tokens included.
    fn encode(&self, value: &str) -> Result<Vec<usize>>;

    /// Converts a sequence of tokens back into a text string.
    fn decode(&self, tokens: &[usize]) -> String;

    /// Gets the size of the tokenizer's vocabulary.
    fn vocab_size(&self) -> usize;

    /// Gets the token used for padding sequences to a consistent length.
    fn pad_token(&self) -> usize;
}

/// Hugging Face `tokenizer.json` tokenizer that truncates to a maximum length.
pub struct HfTokenizer {
    tokenizer: tokenizers::Tokenizer,
    pad_token: usize,
}

impl HfTokenizer {
    /// Loads a tokenizer file. `pad_token_id` comes from the model's config.json.
    pub fn from_file(
        path: impl AsRef<Path>,
        pad_token_id: usize,
        max_seq_len: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            PipelineError::Tokenizer(format!("Failed to load {}: {e}", path.display()))
        })?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_seq_len,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| PipelineError::Tokenizer(e.to_string()))?;
        // Padding is done by the batchers.
        tokenizer.with_padding(None);

        Ok(Self {
            tokenizer,
            pad_token: pad_token_id,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.tokenizer
            .save(path, false)
            .map_err(|e| PipelineError::Tokenizer(e.to_string()))
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, value: &str) -> Result<Vec<usize>> {
        let encoding = self
            .tokenizer
            .encode(value, true)
            .map_err(|e| PipelineError::Tokenizer(format!("Failed to tokenize {value:?}: {e}")))?;

        Ok(encoding.get_ids().iter().map(|t| *t as usize).collect())
    }

    fn decode(&self, tokens: &[usize]) -> String {
        let tokens = tokens.iter().map(|t| *t as u32).collect::<Vec<u32>>();
        self.tokenizer.decode(&tokens, false).unwrap_or_default()
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    fn pad_token(&self) -> usize {
        self.pad_token
    }
}
