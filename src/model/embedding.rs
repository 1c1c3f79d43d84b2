use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Float, Int, Tensor};

#[derive(Config, Debug)]
pub struct EmbeddingsConfig {
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub embedding_size: usize,
    pub hidden_dropout_prob: f64,
    pub layer_norm_eps: f64,
    pub pad_token_idx: usize,
    /// RoBERTa numbering: real tokens start at `pad_token_idx + 1`, padding keeps `pad_token_idx`.
    pub offset_positions: bool,
}

#[derive(Module, Debug)]
pub struct Embeddings<B: Backend> {
    pub pad_token_idx: usize,
    pub offset_positions: bool,
    word_embeddings: Embedding<B>,
    position_embeddings: Embedding<B>,
    token_type_embeddings: Embedding<B>,
    layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl EmbeddingsConfig {
    /// Initializes Embeddings with default weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> Embeddings<B> {
        let word_embeddings =
            EmbeddingConfig::new(self.vocab_size, self.embedding_size).init(device);
        let position_embeddings =
            EmbeddingConfig::new(self.max_position_embeddings, self.embedding_size).init(device);
        let token_type_embeddings =
            EmbeddingConfig::new(self.type_vocab_size, self.embedding_size).init(device);
        let layer_norm = LayerNormConfig::new(self.embedding_size)
            .with_epsilon(self.layer_norm_eps)
            .init(device);

        let dropout = DropoutConfig::new(self.hidden_dropout_prob).init();

        Embeddings {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
            dropout,
            pad_token_idx: self.pad_token_idx,
            offset_positions: self.offset_positions,
        }
    }
}

impl<B: Backend> Embeddings<B> {
    /// Embeds `tokens` [batch_size, seq_len] into [batch_size, seq_len, embedding_size].
    pub fn forward(
        &self,
        tokens: Tensor<B, 2, Int>,
        mask_pad: Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3, Float> {
        let [batch_size, seq_length] = tokens.dims();
        let device = tokens.device();

        let token_type_ids = Tensor::<B, 2, Int>::zeros([batch_size, seq_length], &device);

        let position_ids = if self.offset_positions {
            let start = self.pad_token_idx as i64 + 1;
            Tensor::<B, 1, Int>::arange(start..start + seq_length as i64, &device)
                .reshape([1, seq_length])
                .expand([batch_size, seq_length])
                .mask_fill(mask_pad, self.pad_token_idx as i64)
        } else {
            Tensor::<B, 1, Int>::arange(0..seq_length as i64, &device)
                .reshape([1, seq_length])
                .expand([batch_size, seq_length])
        };

        let embeddings = self.word_embeddings.forward(tokens)
            + self.token_type_embeddings.forward(token_type_ids)
            + self.position_embeddings.forward(position_ids);

        let embeddings = self.layer_norm.forward(embeddings);
        self.dropout.forward(embeddings)
    }
}
