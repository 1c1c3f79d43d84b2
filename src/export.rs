use crate::data::{
    load_dataset, pad_sequences, HfTokenizer, LabelMapping, PaddedSequences, Padding, Tokenizer,
    LABELS_FILE, TOKENIZER_FILE,
};
use crate::error::{PipelineError, Result};
use crate::evaluation::{argmax_rows, load_trained_model};
use crate::model::{ElectraClassifier, ElectraConfig, CONFIG_FILE};
use crate::training::ModelRecorder;
use burn::module::{Module, Quantizer};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::quantization::{Calibration, QuantScheme};
use burn::tensor::{Bool, Int, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FP32_RECORD: &str = "model";
pub const INT8_RECORD: &str = "model_int8";
pub const PROBE_TEXT: &str = "This is a test notification message.";
pub const DEFAULT_EXPORT_MAX_SEQ_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory written by training.
    pub model_dir: PathBuf,
    pub export_dir: PathBuf,
    pub max_seq_len: usize,
    pub probe_text: String,
    /// Used to rebuild the label mapping when the model dir has no labels.json.
    pub dataset_path: PathBuf,
}

/// Describes the exported graph to the app that loads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub model_type: String,
    /// Inputs the model consumes, each `[batch_size, max_seq_len]` of i64.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub max_seq_len: usize,
    pub num_labels: usize,
    pub id2label: BTreeMap<usize, String>,
    pub weights: String,
    pub quantized_weights: String,
}

impl ExportManifest {
    pub fn new(config: &ElectraConfig, labels: &LabelMapping, max_seq_len: usize) -> Self {
        Self {
            model_type: config.model_type.clone(),
            inputs: config.input_names(),
            outputs: vec!["logits".to_string()],
            max_seq_len,
            num_labels: config.num_labels,
            id2label: labels.id2label(),
            weights: format!("{FP32_RECORD}.mpk"),
            quantized_weights: format!("{INT8_RECORD}.mpk"),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Named input tensors for one inference call, row-major `[batch_size, seq_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFeed {
    pub inputs: BTreeMap<String, Vec<i64>>,
    pub batch_size: usize,
    pub seq_len: usize,
}

/// Builds every input the manifest asks for from a tokenizer encoding.
///
/// `token_type_ids` is all zeros; any name other than `input_ids`, `attention_mask`
/// and `token_type_ids` is rejected.
pub fn build_input_feed(input_names: &[String], padded: &PaddedSequences) -> Result<InputFeed> {
    let mut inputs = BTreeMap::new();

    for name in input_names {
        let values = match name.as_str() {
            "input_ids" => padded.ids.clone(),
            "attention_mask" => padded.attention_mask(),
            "token_type_ids" => vec![0; padded.ids.len()],
            other => return Err(PipelineError::UnexpectedGraphInput(other.to_string())),
        };
        inputs.insert(name.clone(), values);
    }

    Ok(InputFeed {
        inputs,
        batch_size: padded.batch_size,
        seq_len: padded.seq_len,
    })
}

/// Runs the classifier on a feed, returning class probabilities per row.
pub fn run_feed<B: Backend>(
    model: &ElectraClassifier<B>,
    feed: &InputFeed,
    device: &B::Device,
) -> Result<Vec<Vec<f32>>> {
    let shape = [feed.batch_size, feed.seq_len];
    let ids = feed
        .inputs
        .get("input_ids")
        .ok_or_else(|| PipelineError::Config("the manifest does not list input_ids".into()))?;
    let mask_pad: Vec<bool> = match feed.inputs.get("attention_mask") {
        Some(mask) => mask.iter().map(|&m| m == 0).collect(),
        None => vec![false; ids.len()],
    };

    let tokens = Tensor::<B, 2, Int>::from_data(TensorData::new(ids.clone(), shape), device);
    let mask_pad = Tensor::<B, 2, Bool>::from_data(TensorData::new(mask_pad, shape), device);
    let probabilities = softmax(model.forward(tokens, mask_pad), 1);

    let [_, num_labels] = probabilities.dims();
    let values = probabilities
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PipelineError::TensorData(format!("{e:?}")))?;

    Ok(values.chunks(num_labels.max(1)).map(<[f32]>::to_vec).collect())
}

fn file_size_mb(path: &Path) -> Result<f64> {
    Ok(std::fs::metadata(path)?.len() as f64 / (1024.0 * 1024.0))
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub export_dir: PathBuf,
    pub fp32_mb: f64,
    pub int8_mb: f64,
    pub probe_label: String,
    pub probe_probabilities: Vec<f32>,
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Exported to {}", self.export_dir.display())?;
        writeln!(f, "fp32 weights: {:.2} MB", self.fp32_mb)?;
        writeln!(f, "int8 weights: {:.2} MB", self.int8_mb)?;
        write!(
            f,
            "Probe prediction: {} {:?}",
            self.probe_label, self.probe_probabilities
        )
    }
}

fn export_labels(config: &ExportConfig, num_labels: usize) -> Result<LabelMapping> {
    let labels = if config.model_dir.join(LABELS_FILE).exists() {
        LabelMapping::load(config.model_dir.join(LABELS_FILE))?
    } else {
        let records = load_dataset(&config.dataset_path)?;
        LabelMapping::load_or_fit(&config.model_dir, &records)?
    };

    if labels.num_labels() != num_labels {
        return Err(PipelineError::LabelCountMismatch {
            expected: num_labels,
            found: labels.num_labels(),
        });
    }
    Ok(labels)
}

/// Writes the mobile inference bundle and checks it on a probe sentence.
pub fn export<B: Backend>(config: ExportConfig, device: B::Device) -> Result<ExportReport> {
    if !config.model_dir.is_dir() {
        return Err(PipelineError::ModelDirNotFound(config.model_dir.clone()));
    }
    std::fs::create_dir_all(&config.export_dir)?;
    let export_dir = config.export_dir.clone();

    let (model_config, model) = load_trained_model::<B>(&config.model_dir, false, &device)?;
    let labels = export_labels(&config, model_config.num_labels)?;
    let tokenizer = HfTokenizer::from_file(
        config.model_dir.join(TOKENIZER_FILE),
        model_config.pad_token_id,
        config.max_seq_len,
    )?;

    let recorder = ModelRecorder::new();
    model
        .clone()
        .save_file(export_dir.join(FP32_RECORD), &recorder)
        .map_err(|e| PipelineError::Record(e.to_string()))?;

    let mut quantizer = Quantizer {
        calibration: Calibration::MinMax,
        scheme: QuantScheme::default(),
    };
    model
        .quantize_weights(&mut quantizer)
        .save_file(export_dir.join(INT8_RECORD), &recorder)
        .map_err(|e| PipelineError::Record(e.to_string()))?;

    model_config.save_trained(export_dir.join(CONFIG_FILE))?;
    labels.save(export_dir.join(LABELS_FILE))?;
    tokenizer.save(export_dir.join(TOKENIZER_FILE))?;
    let manifest = ExportManifest::new(&model_config, &labels, config.max_seq_len);
    manifest.save(export_dir.join(MANIFEST_FILE))?;

    let fp32_mb = file_size_mb(&export_dir.join(&manifest.weights))?;
    let int8_mb = file_size_mb(&export_dir.join(&manifest.quantized_weights))?;
    tracing::info!("fp32 weights: {fp32_mb:.2} MB, int8 weights: {int8_mb:.2} MB");

    let (probe_label, probe_probabilities) =
        verify_export::<B>(&export_dir, &config.probe_text, &device)?;
    tracing::info!("Probe {:?} -> {probe_label}", config.probe_text);

    Ok(ExportReport {
        export_dir,
        fp32_mb,
        int8_mb,
        probe_label,
        probe_probabilities,
    })
}

/// Reloads the quantized bundle from `export_dir` and classifies `text`.
pub fn verify_export<B: Backend>(
    export_dir: &Path,
    text: &str,
    device: &B::Device,
) -> Result<(String, Vec<f32>)> {
    let manifest = ExportManifest::load(export_dir.join(MANIFEST_FILE))?;
    let model_config = ElectraConfig::load_trained(export_dir.join(CONFIG_FILE))?;
    let tokenizer = HfTokenizer::from_file(
        export_dir.join(TOKENIZER_FILE),
        model_config.pad_token_id,
        manifest.max_seq_len,
    )?;

    let record = export_dir.join(&manifest.quantized_weights).with_extension("");
    let model = model_config
        .init::<B>(device)
        .load_file(record, &ModelRecorder::new(), device)
        .map_err(|e| PipelineError::Record(e.to_string()))?;

    let padded = pad_sequences(
        vec![tokenizer.encode(text)?],
        tokenizer.pad_token(),
        Padding::MaxLength,
        manifest.max_seq_len,
    );
    let feed = build_input_feed(&manifest.inputs, &padded)?;
    let probabilities = run_feed(&model, &feed, device)?;

    let predicted = argmax_rows(&probabilities).first().copied().unwrap_or(0);
    let label = manifest
        .id2label
        .get(&predicted)
        .cloned()
        .unwrap_or_else(|| predicted.to_string());

    Ok((label, probabilities.into_iter().next().unwrap_or_default()))
}
