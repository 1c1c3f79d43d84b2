use super::record::{EncodedRecord, TokenizedRecord};
use super::tokenizer::Tokenizer;
use crate::error::Result;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor, TensorData};
use std::sync::Arc;

/// How a batch of token sequences is padded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    /// Pad to the longest sequence of the batch, optionally rounded up to a multiple.
    Longest { multiple_of: Option<usize> },
    /// Pad every sequence to the maximum sequence length.
    MaxLength,
}

impl Padding {
    /// Sequence length of a padded batch whose longest item has `longest` tokens.
    pub fn target_len(&self, longest: usize, max_seq_len: usize) -> usize {
        match self {
            Padding::MaxLength => max_seq_len.max(longest),
            Padding::Longest { multiple_of: None } => longest,
            Padding::Longest {
                multiple_of: Some(multiple),
            } => {
                let multiple = (*multiple).max(1);
                let rounded = longest.div_ceil(multiple) * multiple;
                rounded.min(max_seq_len.max(longest))
            }
        }
    }
}

/// Token ids and padding flags of a batch, row-major `[batch_size, seq_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedSequences {
    pub ids: Vec<i64>,
    /// `true` at padding positions.
    pub mask_pad: Vec<bool>,
    pub batch_size: usize,
    pub seq_len: usize,
}

impl PaddedSequences {
    /// Attention mask in the Hugging Face convention: 1 for real tokens, 0 for padding.
    pub fn attention_mask(&self) -> Vec<i64> {
        self.mask_pad.iter().map(|pad| i64::from(!pad)).collect()
    }

    pub fn tokens<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2, Int> {
        Tensor::from_data(
            TensorData::new(self.ids.clone(), [self.batch_size, self.seq_len]),
            device,
        )
    }

    pub fn mask<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2, Bool> {
        Tensor::from_data(
            TensorData::new(self.mask_pad.clone(), [self.batch_size, self.seq_len]),
            device,
        )
    }
}

/// Truncates each sequence to `max_seq_len` and pads the batch with `pad_token`.
pub fn pad_sequences(
    sequences: Vec<Vec<usize>>,
    pad_token: usize,
    padding: Padding,
    max_seq_len: usize,
) -> PaddedSequences {
    let longest = sequences
        .iter()
        .map(|tokens| tokens.len().min(max_seq_len))
        .max()
        .unwrap_or(0)
        .max(1);
    let seq_len = padding.target_len(longest, max_seq_len);
    let batch_size = sequences.len();

    let mut ids = vec![pad_token as i64; batch_size * seq_len];
    let mut mask_pad = vec![true; batch_size * seq_len];

    for (row, tokens) in sequences.iter().enumerate() {
        for (col, &token) in tokens.iter().take(seq_len).enumerate() {
            ids[row * seq_len + col] = token as i64;
            mask_pad[row * seq_len + col] = false;
        }
    }

    PaddedSequences {
        ids,
        mask_pad,
        batch_size,
        seq_len,
    }
}

/// Tokenizes every record once, ahead of batching.
pub fn tokenize_records(
    tokenizer: &dyn Tokenizer,
    records: &[EncodedRecord],
) -> Result<Vec<TokenizedRecord>> {
    records
        .iter()
        .map(|record| {
            Ok(TokenizedRecord {
                tokens: tokenizer.encode(&record.body)?,
                label: record.label,
            })
        })
        .collect()
}

/// Truncation and padding settings shared by the batchers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, new)]
pub struct SequencePadder {
    pub pad_token: usize,
    pub max_seq_len: usize,
    pub padding: Padding,
}

impl SequencePadder {
    pub fn pad(&self, sequences: Vec<Vec<usize>>) -> PaddedSequences {
        pad_sequences(sequences, self.pad_token, self.padding, self.max_seq_len)
    }

    /// Tokenizes `texts` and pads them as one batch.
    pub fn encode(&self, tokenizer: &dyn Tokenizer, texts: &[&str]) -> Result<PaddedSequences> {
        let sequences = texts
            .iter()
            .map(|text| tokenizer.encode(text))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.pad(sequences))
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    /// Tokenized text as 2D tensor: [batch_size, seq_len]
    pub tokens: Tensor<B, 2, Int>,
    /// Padding mask containing booleans for padding locations
    pub mask_pad: Tensor<B, 2, Bool>,
    /// Label ids: [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

#[derive(Debug, Clone, new)]
pub struct InferenceBatch<B: Backend> {
    pub tokens: Tensor<B, 2, Int>,
    pub mask_pad: Tensor<B, 2, Bool>,
}

/// Pads pre-tokenized records for the learner's data loaders.
#[derive(Clone, new)]
pub struct ClassificationBatcher {
    padder: SequencePadder,
}

impl<B: Backend> Batcher<B, TokenizedRecord, ClassificationBatch<B>> for ClassificationBatcher {
    fn batch(&self, items: Vec<TokenizedRecord>, device: &B::Device) -> ClassificationBatch<B> {
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let batch_size = labels.len();
        let padded = self
            .padder
            .pad(items.into_iter().map(|item| item.tokens).collect());

        ClassificationBatch {
            tokens: padded.tokens(device),
            mask_pad: padded.mask(device),
            labels: Tensor::from_data(TensorData::new(labels, [batch_size]), device),
        }
    }
}

/// Tokenizes and pads raw texts for prediction.
#[derive(Clone)]
pub struct InferenceBatcher {
    tokenizer: Arc<dyn Tokenizer>,
    padder: SequencePadder,
}

impl InferenceBatcher {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, max_seq_len: usize, padding: Padding) -> Self {
        let padder = SequencePadder::new(tokenizer.pad_token(), max_seq_len, padding);
        Self { tokenizer, padder }
    }

    pub fn pad(&self, texts: &[&str]) -> Result<PaddedSequences> {
        self.padder.encode(self.tokenizer.as_ref(), texts)
    }

    pub fn batch<B: Backend>(&self, texts: &[&str], device: &B::Device) -> Result<InferenceBatch<B>> {
        let padded = self.pad(texts)?;

        Ok(InferenceBatch::new(padded.tokens(device), padded.mask(device)))
    }
}

/// One tokenized partition of the dataset, served to burn's data loaders.
#[derive(Debug, Clone, new)]
pub struct SplitDataset {
    items: Vec<TokenizedRecord>,
}

impl Dataset<TokenizedRecord> for SplitDataset {
    fn get(&self, index: usize) -> Option<TokenizedRecord> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    /// One token per word after a leading 2; refuses any text containing `\0`.
    struct StrictTokenizer;

    impl Tokenizer for StrictTokenizer {
        fn encode(&self, value: &str) -> Result<Vec<usize>> {
            if value.contains('\0') {
                return Err(PipelineError::Tokenizer(format!("cannot encode {value:?}")));
            }
            Ok(std::iter::once(2)
                .chain(value.split_whitespace().map(str::len))
                .collect())
        }

        fn decode(&self, tokens: &[usize]) -> String {
            format!("{tokens:?}")
        }

        fn vocab_size(&self) -> usize {
            32
        }

        fn pad_token(&self) -> usize {
            0
        }
    }

    fn record(body: &str, label: usize) -> EncodedRecord {
        EncodedRecord {
            body: body.to_string(),
            label,
        }
    }

    #[test]
    fn longest_padding_uses_the_batch_maximum() {
        let padding = Padding::Longest { multiple_of: None };
        let padded = pad_sequences(vec![vec![5, 6, 7], vec![8]], 0, padding, 128);

        assert_eq!(padded.seq_len, 3);
        assert_eq!(padded.ids, vec![5, 6, 7, 8, 0, 0]);
        assert_eq!(padded.mask_pad, vec![false, false, false, false, true, true]);
        assert_eq!(padded.attention_mask(), vec![1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn longest_padding_rounds_to_multiple() {
        let padding = Padding::Longest {
            multiple_of: Some(8),
        };

        assert_eq!(padding.target_len(3, 128), 8);
        assert_eq!(padding.target_len(9, 128), 16);
        assert_eq!(padding.target_len(16, 128), 16);
        assert_eq!(padding.target_len(61, 64), 64);
    }

    #[test]
    fn max_length_padding_is_fixed() {
        let padded = pad_sequences(vec![vec![1, 2]], 1, Padding::MaxLength, 6);

        assert_eq!(padded.seq_len, 6);
        assert_eq!(padded.ids, vec![1, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn sequences_are_truncated() {
        let padded = pad_sequences(vec![(0..10).collect()], 0, Padding::MaxLength, 4);

        assert_eq!(padded.ids, vec![0, 1, 2, 3]);
        assert!(padded.mask_pad.iter().all(|pad| !pad));
    }

    #[test]
    fn records_are_tokenized_once_with_labels() {
        let records = vec![record("a bb ccc", 1), record("dddd", 0)];

        let tokenized = tokenize_records(&StrictTokenizer, &records).unwrap();

        assert_eq!(
            tokenized,
            vec![
                TokenizedRecord {
                    tokens: vec![2, 1, 2, 3],
                    label: 1
                },
                TokenizedRecord {
                    tokens: vec![2, 4],
                    label: 0
                },
            ]
        );
    }

    #[test]
    fn tokenizer_failures_are_reported() {
        let records = vec![record("fine", 0), record("broken\0text", 1)];

        assert!(matches!(
            tokenize_records(&StrictTokenizer, &records),
            Err(PipelineError::Tokenizer(_))
        ));

        let batcher = InferenceBatcher::new(Arc::new(StrictTokenizer), 8, Padding::MaxLength);
        assert!(matches!(
            batcher.pad(&["fine", "broken\0text"]),
            Err(PipelineError::Tokenizer(_))
        ));
    }

    #[test]
    fn batchers_share_truncation_and_padding() {
        let padder = SequencePadder::new(0, 3, Padding::Longest { multiple_of: None });
        let batcher = InferenceBatcher::new(Arc::new(StrictTokenizer), 3, padder.padding);

        let from_text = batcher.pad(&["a bb ccc dddd", "e"]).unwrap();
        let from_tokens = padder.pad(vec![vec![2, 1, 2, 3, 4], vec![2, 1]]);

        assert_eq!(from_text, from_tokens);
        assert_eq!(from_text.ids, vec![2, 1, 2, 2, 1, 0]);
    }
}
