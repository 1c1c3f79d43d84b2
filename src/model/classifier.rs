use super::config::{ElectraConfig, EncoderFlavour};
use super::embedding::{Embeddings, EmbeddingsConfig};
use super::loss::LossStrategy;
use crate::data::{ClassificationBatch, InferenceBatch};
use burn::module::{Ignored, Module};
use burn::nn::transformer::{TransformerEncoder, TransformerEncoderInput};
use burn::nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor};
use burn::train::ClassificationOutput;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadActivation {
    Gelu,
    Tanh,
}

/// Encoder body shared by the supported model families.
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub embeddings: Embeddings<B>,
    /// Present when the embedding width differs from the hidden size (ELECTRA).
    pub embeddings_project: Option<Linear<B>>,
    pub encoder: TransformerEncoder<B>,
}

impl<B: Backend> Backbone<B> {
    /// Hidden states of the last layer: [batch_size, seq_len, hidden_size].
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let embeddings = self.embeddings.forward(tokens, mask_pad.clone());
        let embeddings = match &self.embeddings_project {
            Some(project) => project.forward(embeddings),
            None => embeddings,
        };

        let input = TransformerEncoderInput::new(embeddings).mask_pad(mask_pad);
        self.encoder.forward(input)
    }
}

/// Sentence classification head applied to the first token.
#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    pub dense: Linear<B>,
    pub out_proj: Linear<B>,
    dropout: Dropout,
    gelu: Gelu,
    activation: Ignored<HeadActivation>,
}

impl<B: Backend> ClassificationHead<B> {
    pub fn forward(&self, hidden_states: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, _, hidden_size] = hidden_states.dims();
        let first_token = hidden_states
            .slice([0..batch_size, 0..1])
            .reshape([batch_size, hidden_size]);

        let x = self.dropout.forward(first_token);
        let x = self.dense.forward(x);
        let x = match self.activation.0 {
            HeadActivation::Gelu => self.gelu.forward(x),
            HeadActivation::Tanh => x.tanh(),
        };
        let x = self.dropout.forward(x);

        self.out_proj.forward(x)
    }
}

/// Transformer encoder with a sequence classification head.
#[derive(Module, Debug)]
pub struct ElectraClassifier<B: Backend> {
    pub backbone: Backbone<B>,
    pub classifier: ClassificationHead<B>,
    loss: Ignored<LossStrategy>,
}

impl ElectraConfig {
    /// Initialize model with default (random) weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ElectraClassifier<B> {
        let flavour = self.flavour();

        let embeddings = EmbeddingsConfig {
            vocab_size: self.vocab_size,
            max_position_embeddings: self.max_position_embeddings,
            type_vocab_size: self.type_vocab_size,
            embedding_size: self.embedding_size,
            hidden_dropout_prob: self.hidden_dropout_prob,
            layer_norm_eps: self.layer_norm_eps,
            pad_token_idx: self.pad_token_id,
            offset_positions: flavour == EncoderFlavour::Roberta,
        }
        .init(device);

        let embeddings_project = (self.embedding_size != self.hidden_size)
            .then(|| LinearConfig::new(self.embedding_size, self.hidden_size).init(device));

        let backbone = Backbone {
            embeddings,
            embeddings_project,
            encoder: self.encoder_config().init(device),
        };

        let activation = match flavour {
            EncoderFlavour::Electra => HeadActivation::Gelu,
            EncoderFlavour::Roberta | EncoderFlavour::Bert => HeadActivation::Tanh,
        };
        let classifier = ClassificationHead {
            dense: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            out_proj: LinearConfig::new(self.hidden_size, self.num_labels).init(device),
            dropout: DropoutConfig::new(self.hidden_dropout_prob).init(),
            gelu: Gelu::new(),
            activation: Ignored(activation),
        };

        ElectraClassifier {
            backbone,
            classifier,
            loss: Ignored(LossStrategy::default()),
        }
    }
}

impl<B: Backend> ElectraClassifier<B> {
    /// Replaces the loss used by [`forward_classification`](Self::forward_classification).
    pub fn with_loss(mut self, loss: LossStrategy) -> Self {
        self.loss = Ignored(loss);
        self
    }

    pub fn loss_strategy(&self) -> &LossStrategy {
        &self.loss.0
    }

    /// Logits [batch_size, num_labels].
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
        let hidden_states = self.backbone.forward(tokens, mask_pad);
        self.classifier.forward(hidden_states)
    }

    /// Class probabilities [batch_size, num_labels].
    pub fn infer(&self, batch: InferenceBatch<B>) -> Tensor<B, 2> {
        softmax(self.forward(batch.tokens, batch.mask_pad), 1)
    }

    pub fn forward_classification(&self, batch: ClassificationBatch<B>) -> ClassificationOutput<B> {
        let logits = self.forward(batch.tokens, batch.mask_pad);
        let loss = self.loss.0.forward(logits.clone(), batch.labels.clone());

        ClassificationOutput::new(loss, logits, batch.labels)
    }
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn tiny_config(model_type: &str, embedding_size: usize) -> ElectraConfig {
        ElectraConfig {
            model_type: model_type.to_string(),
            vocab_size: 50,
            embedding_size,
            hidden_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 32,
            max_position_embeddings: 40,
            type_vocab_size: 2,
            hidden_dropout_prob: 0.0,
            layer_norm_eps: 1e-12,
            pad_token_id: 1,
            num_labels: 3,
        }
    }

    fn batch(device: &<B as Backend>::Device) -> InferenceBatch<B> {
        let tokens = Tensor::from_data(
            TensorData::new(vec![2i64, 7, 9, 3, 2, 5, 1, 1], [2, 4]),
            device,
        );
        let mask_pad = Tensor::from_data(
            TensorData::new(vec![false, false, false, false, false, false, true, true], [2, 4]),
            device,
        );
        InferenceBatch::new(tokens, mask_pad)
    }

    #[test]
    fn electra_projects_embeddings() {
        let device = Default::default();
        let model = tiny_config("electra", 8).init::<B>(&device);

        assert!(model.backbone.embeddings_project.is_some());
        let logits = model.forward(batch(&device).tokens, batch(&device).mask_pad);
        assert_eq!(logits.dims(), [2, 3]);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let device = Default::default();
        let model = tiny_config("roberta", 16).init::<B>(&device);

        assert!(model.backbone.embeddings_project.is_none());
        let sums: Vec<f32> = model
            .infer(batch(&device))
            .sum_dim(1)
            .into_data()
            .to_vec()
            .unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
