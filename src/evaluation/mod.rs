mod latency;
mod metrics;

pub use latency::*;
pub use metrics::*;

use crate::data::{
    load_dataset, stratified_split, EncodedRecord, HfTokenizer, InferenceBatcher, LabelMapping,
    Padding, PaddedSequences, TOKENIZER_FILE,
};
use crate::error::{PipelineError, Result};
use crate::model::{resolve_tokenizer_file, ElectraClassifier, ElectraConfig, CONFIG_FILE};
use crate::training::resolve_model_source;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Directory written by training.
    pub model_dir: PathBuf,
    /// Hub model id used for the tokenizer when the model dir has none.
    pub model_name: String,
    pub max_seq_len: usize,
    pub batch_size: usize,
    /// Test samples to score; 0 scores the whole test split.
    pub max_samples: usize,
    pub seed: u64,
    /// Score the latest epoch checkpoint rather than the final weights.
    pub prefer_checkpoint: bool,
    /// Single-inference runs of the latency report; `None` skips the report.
    pub latency_runs: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub metrics: ClassificationReport,
    pub timings: Option<TimingReport>,
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metrics)?;
        if let Some(timings) = &self.timings {
            write!(f, "\n\n{timings}")?;
        }
        Ok(())
    }
}

/// Random subset of at most `max_samples` items; 0 keeps everything.
pub fn sample_records(
    mut items: Vec<EncodedRecord>,
    max_samples: usize,
    seed: u64,
) -> Vec<EncodedRecord> {
    if max_samples == 0 || max_samples >= items.len() {
        return items;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
    items.truncate(max_samples);
    items
}

/// Tokenizes and pads `texts` in chunks of `batch_size`.
pub fn tokenize_in_batches(
    batcher: &InferenceBatcher,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<PaddedSequences>> {
    texts
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let chunk: Vec<&str> = chunk.iter().map(String::as_str).collect();
            batcher.pad(&chunk)
        })
        .collect()
}

/// Class probabilities of pre-tokenized batches.
pub fn forward_batches<B: Backend>(
    model: &ElectraClassifier<B>,
    batches: &[PaddedSequences],
    device: &B::Device,
) -> Result<Vec<Vec<f32>>> {
    let mut probabilities = Vec::new();

    for (idx, padded) in batches.iter().enumerate() {
        let logits = model.forward(padded.tokens::<B>(device), padded.mask::<B>(device));
        probabilities.extend(probability_rows(softmax(logits, 1))?);

        if (idx + 1) % PROGRESS_EVERY == 0 {
            tracing::info!("Processed {}/{} batches", idx + 1, batches.len());
        }
    }

    Ok(probabilities)
}

fn probability_rows<B: Backend>(probabilities: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, num_labels] = probabilities.dims();
    let values = probabilities
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PipelineError::TensorData(format!("{e:?}")))?;

    Ok(values
        .chunks(num_labels.max(1))
        .map(<[f32]>::to_vec)
        .collect())
}

/// Class probabilities of `texts`, batched.
pub fn predict_probabilities<B: Backend>(
    model: &ElectraClassifier<B>,
    batcher: &InferenceBatcher,
    texts: &[String],
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<Vec<f32>>> {
    let batches = tokenize_in_batches(batcher, texts, batch_size)?;
    forward_batches(model, &batches, device)
}

/// Loads the weights, config and labels a training run left in `model_dir`.
pub fn load_trained_model<B: Backend>(
    model_dir: &Path,
    prefer_checkpoint: bool,
    device: &B::Device,
) -> Result<(ElectraConfig, ElectraClassifier<B>)> {
    if !model_dir.is_dir() {
        return Err(PipelineError::ModelDirNotFound(model_dir.to_path_buf()));
    }

    let model_config = ElectraConfig::load_trained(model_dir.join(CONFIG_FILE))?;
    let source = resolve_model_source(model_dir, prefer_checkpoint)?;
    tracing::info!("Loading weights from {}", source.path().display());
    let model = source.load(model_config.init::<B>(device), device)?;

    Ok((model_config, model))
}

/// Scores the trained model on the test split rebuilt from the dataset.
pub fn evaluate<B: Backend>(
    dataset_path: &Path,
    config: EvaluationConfig,
    device: B::Device,
) -> Result<EvaluationReport> {
    // Dataset
    let start = Instant::now();
    let records = load_dataset(dataset_path)?;
    let labels = LabelMapping::load_or_fit(&config.model_dir, &records)?;
    let splits = stratified_split(labels.encode_records(records)?, config.seed)?;
    let test = sample_records(splits.test, config.max_samples, config.seed);
    let dataset_prep = start.elapsed();
    tracing::info!("Evaluating on {} test samples", test.len());

    // Tokenizer
    let start = Instant::now();
    let local_tokenizer = config.model_dir.join(TOKENIZER_FILE);
    let tokenizer_path = if local_tokenizer.exists() {
        local_tokenizer
    } else {
        resolve_tokenizer_file(&config.model_name)?
    };
    let tokenizer_load = start.elapsed();

    // Model
    let start = Instant::now();
    let (model_config, model) =
        load_trained_model::<B>(&config.model_dir, config.prefer_checkpoint, &device)?;
    let model_load = start.elapsed();
    if model_config.num_labels != labels.num_labels() {
        return Err(PipelineError::LabelCountMismatch {
            expected: model_config.num_labels,
            found: labels.num_labels(),
        });
    }

    let tokenizer = Arc::new(HfTokenizer::from_file(
        &tokenizer_path,
        model_config.pad_token_id,
        config.max_seq_len,
    )?);
    let batcher = InferenceBatcher::new(tokenizer, config.max_seq_len, Padding::MaxLength);

    // Inference
    let texts: Vec<String> = test.iter().map(|item| item.body.clone()).collect();
    let y_true: Vec<usize> = test.iter().map(|item| item.label).collect();

    let start = Instant::now();
    let batches = tokenize_in_batches(&batcher, &texts, config.batch_size)?;
    let tokenization = start.elapsed();

    let start = Instant::now();
    let probabilities = forward_batches(&model, &batches, &device)?;
    let forward_pass = start.elapsed();

    let metrics = ClassificationReport::compute(&y_true, &probabilities, labels.num_labels());

    let timings = match (config.latency_runs, texts.first()) {
        (Some(runs), Some(sample)) => {
            let latency = measure_latency(runs, || {
                let padded = batcher.pad(&[sample.as_str()])?;
                let logits = model.forward(padded.tokens::<B>(&device), padded.mask::<B>(&device));
                probability_rows(softmax(logits, 1)).map(|_| ())
            })?;

            Some(TimingReport {
                dataset_prep,
                tokenizer_load,
                model_load,
                tokenization,
                forward_pass,
                samples: texts.len(),
                latency,
            })
        }
        _ => None,
    };

    Ok(EvaluationReport { metrics, timings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<EncodedRecord> {
        (0..n)
            .map(|i| EncodedRecord {
                body: format!("message {i}"),
                label: i % 2,
            })
            .collect()
    }

    #[test]
    fn zero_max_samples_keeps_everything() {
        assert_eq!(sample_records(items(10), 0, 42), items(10));
        assert_eq!(sample_records(items(10), 50, 42), items(10));
    }

    #[test]
    fn sampling_is_seeded() {
        let first = sample_records(items(100), 10, 42);
        let second = sample_records(items(100), 10, 42);

        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
    }
}
