use crate::error::PipelineError;
use burn::config::Config;
use burn::nn::transformer::TransformerEncoderConfig;
use burn::nn::Initializer::KaimingUniform;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.json";

/// Encoder family, which decides position ids and the classification head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderFlavour {
    Electra,
    Roberta,
    Bert,
}

/// Sequence classifier configuration.
///
/// Built from a Hugging Face config.json with [`ElectraConfig::load_from_hf`]; saved
/// next to trained weights with [`Config::save`].
#[derive(Config, Debug)]
pub struct ElectraConfig {
    /// `electra`, `roberta` or `bert`.
    pub model_type: String,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Width of the token embeddings; projected to `hidden_size` when smaller.
    pub embedding_size: usize,
    /// Hidden size of the encoder.
    pub hidden_size: usize,
    /// Number of transformer encoder layers.
    pub num_hidden_layers: usize,
    /// Number of attention heads.
    pub num_attention_heads: usize,
    /// Feed-forward intermediate size.
    pub intermediate_size: usize,
    /// Maximum position embeddings.
    pub max_position_embeddings: usize,
    /// Token type vocabulary size.
    pub type_vocab_size: usize,
    /// Dropout probability.
    pub hidden_dropout_prob: f64,
    /// Layer normalization epsilon.
    pub layer_norm_eps: f64,
    /// Padding token id.
    pub pad_token_id: usize,
    /// Number of output classes.
    pub num_labels: usize,
}

#[derive(Deserialize)]
struct HfConfig {
    #[serde(default = "default_model_type")]
    model_type: String,
    vocab_size: usize,
    embedding_size: Option<usize>,
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
    max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    type_vocab_size: usize,
    #[serde(default = "default_dropout")]
    hidden_dropout_prob: f64,
    #[serde(default = "default_layer_norm_eps")]
    layer_norm_eps: f64,
    #[serde(default)]
    pad_token_id: usize,
}

fn default_model_type() -> String {
    "bert".to_string()
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_dropout() -> f64 {
    0.1
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl ElectraConfig {
    /// Load configuration from a Hugging Face config.json file.
    ///
    /// Extra fields in the config file are ignored. The label count comes from the
    /// dataset, not from the checkpoint.
    pub fn load_from_hf<P: AsRef<Path>>(path: P, num_labels: usize) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let hf: HfConfig = serde_json::from_str(&content)?;

        Ok(Self {
            embedding_size: hf.embedding_size.unwrap_or(hf.hidden_size),
            model_type: hf.model_type,
            vocab_size: hf.vocab_size,
            hidden_size: hf.hidden_size,
            num_hidden_layers: hf.num_hidden_layers,
            num_attention_heads: hf.num_attention_heads,
            intermediate_size: hf.intermediate_size,
            max_position_embeddings: hf.max_position_embeddings,
            type_vocab_size: hf.type_vocab_size,
            hidden_dropout_prob: hf.hidden_dropout_prob,
            layer_norm_eps: hf.layer_norm_eps,
            pad_token_id: hf.pad_token_id,
            num_labels,
        })
    }

    /// Load a config saved next to trained weights.
    pub fn load_trained<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        Self::load(path).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn save_trained<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        self.save(path)?;
        Ok(())
    }

    pub fn flavour(&self) -> EncoderFlavour {
        match self.model_type.as_str() {
            "electra" => EncoderFlavour::Electra,
            "roberta" | "xlm-roberta" | "camembert" => EncoderFlavour::Roberta,
            _ => EncoderFlavour::Bert,
        }
    }

    /// Graph inputs the exported model consumes.
    pub fn input_names(&self) -> Vec<String> {
        let mut names = vec!["input_ids".to_string(), "attention_mask".to_string()];
        if self.flavour() != EncoderFlavour::Roberta {
            names.push("token_type_ids".to_string());
        }
        names
    }

    pub(crate) fn encoder_config(&self) -> TransformerEncoderConfig {
        TransformerEncoderConfig::new(
            self.hidden_size,
            self.intermediate_size,
            self.num_attention_heads,
            self.num_hidden_layers,
        )
        .with_dropout(self.hidden_dropout_prob)
        .with_norm_first(false)
        .with_quiet_softmax(false)
        .with_initializer(KaimingUniform {
            gain: 1.0 / libm::sqrt(3.0),
            fan_out_only: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ELECTRA_SMALL: &str = r#"{
        "architectures": ["ElectraForPreTraining"],
        "attention_probs_dropout_prob": 0.1,
        "embedding_size": 128,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "hidden_size": 256,
        "initializer_range": 0.02,
        "intermediate_size": 1024,
        "layer_norm_eps": 1e-12,
        "max_position_embeddings": 512,
        "model_type": "electra",
        "num_attention_heads": 4,
        "num_hidden_layers": 12,
        "pad_token_id": 0,
        "type_vocab_size": 2,
        "vocab_size": 30522
    }"#;

    const ROBERTA_BASE: &str = r#"{
        "hidden_size": 768,
        "intermediate_size": 3072,
        "max_position_embeddings": 514,
        "model_type": "roberta",
        "num_attention_heads": 12,
        "num_hidden_layers": 12,
        "pad_token_id": 1,
        "type_vocab_size": 1,
        "layer_norm_eps": 1e-05,
        "vocab_size": 50265
    }"#;

    fn parse(json: &str, num_labels: usize) -> ElectraConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, json).unwrap();
        ElectraConfig::load_from_hf(&path, num_labels).unwrap()
    }

    #[test]
    fn electra_small_config_is_parsed() {
        let config = parse(ELECTRA_SMALL, 3);

        assert_eq!(config.flavour(), EncoderFlavour::Electra);
        assert_eq!(config.embedding_size, 128);
        assert_eq!(config.hidden_size, 256);
        assert_eq!(config.num_labels, 3);
        assert_eq!(
            config.input_names(),
            vec!["input_ids", "attention_mask", "token_type_ids"]
        );
    }

    #[test]
    fn roberta_embeddings_default_to_hidden_size() {
        let config = parse(ROBERTA_BASE, 2);

        assert_eq!(config.flavour(), EncoderFlavour::Roberta);
        assert_eq!(config.embedding_size, 768);
        assert_eq!(config.pad_token_id, 1);
        assert_eq!(config.input_names(), vec!["input_ids", "attention_mask"]);
    }

    #[test]
    fn trained_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = parse(ELECTRA_SMALL, 4);

        config.save_trained(&path).unwrap();
        let loaded = ElectraConfig::load_trained(&path).unwrap();

        assert_eq!(loaded.num_labels, 4);
        assert_eq!(loaded.model_type, "electra");
    }
}
