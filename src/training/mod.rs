mod checkpoint;
mod scheduler;

pub use checkpoint::*;
pub use scheduler::*;

use crate::data::{
    load_dataset, stratified_split, tokenize_records, ClassificationBatch, ClassificationBatcher,
    EncodedRecord, HfTokenizer, InferenceBatcher, LabelMapping, Padding, SequencePadder,
    SplitDataset, Tokenizer, LABELS_FILE, TOKENIZER_FILE,
};
use crate::error::PipelineError;
use crate::evaluation::{argmax_rows, macro_f1, predict_probabilities};
use crate::model::{
    balanced_class_weights, load_pretrained, resolve_model_files, ElectraClassifier,
    ElectraConfig, LossStrategy, CONFIG_FILE,
};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::optim::AdamWConfig;
use burn::prelude::*;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{AccuracyMetric, LearningRateMetric, LossMetric};
use burn::train::checkpoint::KeepLastNCheckpoints;
use burn::train::{
    ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
};
use std::any::Any;
use std::fmt;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub const TRAINING_CONFIG_FILE: &str = "training.json";

impl<B: AutodiffBackend> TrainStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for ElectraClassifier<B>
{
    fn step(&self, batch: ClassificationBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for ElectraClassifier<B>
{
    fn step(&self, batch: ClassificationBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch)
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Hub model id or local directory of the pretrained encoder.
    pub model_name: String,

    pub output_dir: String,

    #[config(default = 2)]
    pub num_epochs: usize,

    #[config(default = 16)]
    pub batch_size: usize,

    #[config(default = 32)]
    pub eval_batch_size: usize,

    #[config(default = 2)]
    pub grad_accumulation: usize,

    #[config(default = 4)]
    pub num_workers: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 3e-5)]
    pub learning_rate: f64,

    #[config(default = 0.01)]
    pub weight_decay: f32,

    #[config(default = 0.1)]
    pub warmup_ratio: f64,

    #[config(default = 128)]
    pub max_seq_len: usize,

    /// Rounds the padded length of training batches up to a multiple of this.
    pub pad_to_multiple_of: Option<usize>,
}

impl TrainingConfig {
    /// Scheduler steps over the whole run.
    ///
    /// The learner steps the scheduler on every batch, accumulated or not.
    pub fn total_steps(&self, train_size: usize) -> usize {
        train_size.div_ceil(self.batch_size.max(1)) * self.num_epochs
    }

    /// Every epoch keeps its checkpoint so the best one can be picked after training.
    pub fn checkpoints_to_keep(&self) -> usize {
        self.num_epochs.max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub train_size: usize,
    pub validation_size: usize,
    pub test_size: usize,
    pub best_epoch: usize,
    pub validation_macro_f1: f64,
}

impl fmt::Display for TrainingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Train: {}, Val: {}, Test: {}",
            self.train_size, self.validation_size, self.test_size
        )?;
        write!(
            f,
            "Best epoch: {} (validation macro F1 {:.4})",
            self.best_epoch, self.validation_macro_f1
        )
    }
}

fn create_artifact_dir(artifact_dir: &Path) -> crate::error::Result<()> {
    // Remove previous learner artifacts to get an accurate learner summary
    for stale in [CHECKPOINT_DIR, "train", "valid"] {
        match std::fs::remove_dir_all(artifact_dir.join(stale)) {
            Err(err) if err.kind() != ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
    }
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::new()
    }
}

/// Runs `f`, turning an out-of-memory panic into [`PipelineError::OutOfMemory`].
///
/// Any other panic keeps unwinding.
pub fn guard_out_of_memory<T>(f: impl FnOnce() -> T) -> crate::error::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            if message.to_lowercase().contains("out of memory") {
                tracing::error!("Training ran out of memory: {message}");
                Err(PipelineError::OutOfMemory)
            } else {
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Scores every saved epoch on the validation split and returns the best by macro F1.
///
/// Ties keep the earliest epoch.
pub fn select_best_checkpoint<B: Backend>(
    model_dir: &Path,
    model_config: &ElectraConfig,
    batcher: &InferenceBatcher,
    validation: &[EncodedRecord],
    batch_size: usize,
    device: &B::Device,
) -> crate::error::Result<(usize, f64, ElectraClassifier<B>)> {
    let texts: Vec<String> = validation.iter().map(|item| item.body.clone()).collect();
    let labels: Vec<usize> = validation.iter().map(|item| item.label).collect();

    let mut best: Option<(usize, f64, ElectraClassifier<B>)> = None;
    for source in list_checkpoints(model_dir)? {
        let ModelSource::Checkpoint { epoch, .. } = source else {
            continue;
        };
        let model = source.load(model_config.init::<B>(device), device)?;
        let probabilities = predict_probabilities(&model, batcher, &texts, batch_size, device)?;
        let f1 = macro_f1(&labels, &argmax_rows(&probabilities));
        tracing::info!("Epoch {epoch}: validation macro F1 {f1:.4}");

        if best.as_ref().is_none_or(|(_, best_f1, _)| f1 > *best_f1) {
            best = Some((epoch, f1, model));
        }
    }

    best.ok_or_else(|| PipelineError::ModelNotFound(model_dir.join(CHECKPOINT_DIR)))
}

/// Fine-tunes a pretrained encoder on the dataset at `dataset_path`.
///
/// Writes checkpoints, the best weights (`model.mpk`), `config.json`, `tokenizer.json`,
/// `labels.json` and `training.json` into `config.output_dir`.
pub fn train<B: AutodiffBackend>(
    dataset_path: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> crate::error::Result<TrainingSummary> {
    let artifact_dir = PathBuf::from(&config.output_dir);
    create_artifact_dir(&artifact_dir)?;
    config.save(artifact_dir.join(TRAINING_CONFIG_FILE))?;

    B::seed(&device, config.seed);

    // Data
    let records = load_dataset(dataset_path)?;
    let labels = LabelMapping::fit(&records);
    tracing::info!("Labels: {:?}", labels.label2id());
    let splits = stratified_split(labels.encode_records(records)?, config.seed)?;
    let (train_size, validation_size, test_size) = splits.sizes();
    tracing::info!("Train: {train_size}, Val: {validation_size}, Test: {test_size}");

    let train_labels: Vec<usize> = splits.train.iter().map(|item| item.label).collect();
    let class_weights = balanced_class_weights(&train_labels, labels.num_labels());
    tracing::info!("Class weights: {class_weights:?}");

    // Pretrained model and tokenizer
    let files = resolve_model_files(&config.model_name)?;
    let model_config = ElectraConfig::load_from_hf(&files.config_path, labels.num_labels())?;
    let tokenizer = Arc::new(HfTokenizer::from_file(
        &files.tokenizer_path,
        model_config.pad_token_id,
        config.max_seq_len,
    )?);

    let mut model = model_config.init::<B>(&device);
    load_pretrained(&mut model, &files.weights_path)?;
    let model = model.with_loss(LossStrategy::Weighted(class_weights));

    // Dataloaders
    let train_items = tokenize_records(tokenizer.as_ref(), &splits.train)?;
    let validation_items = tokenize_records(tokenizer.as_ref(), &splits.validation)?;
    let padding = Padding::Longest {
        multiple_of: config.pad_to_multiple_of,
    };
    let batcher = ClassificationBatcher::new(SequencePadder::new(
        tokenizer.pad_token(),
        config.max_seq_len,
        padding,
    ));

    let dataloader_train: Arc<dyn DataLoader<B, ClassificationBatch<B>>> =
        DataLoaderBuilder::new(batcher.clone())
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .build(SplitDataset::new(train_items));

    let dataloader_valid: Arc<
        dyn DataLoader<B::InnerBackend, ClassificationBatch<B::InnerBackend>>,
    > = DataLoaderBuilder::new(batcher)
        .batch_size(config.eval_batch_size)
        .num_workers(config.num_workers)
        .build(SplitDataset::new(validation_items));

    // Optimization
    let optimizer = AdamWConfig::new()
        .with_weight_decay(config.weight_decay)
        .init();
    let scheduler = WarmupLinearScheduler::with_warmup_ratio(
        config.learning_rate,
        config.warmup_ratio,
        config.total_steps(train_size),
    );

    let learner = LearnerBuilder::new(&config.output_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(LearningRateMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .with_checkpointing_strategy(KeepLastNCheckpoints::new(config.checkpoints_to_keep()))
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(config.num_epochs)
        .grads_accumulation(config.grad_accumulation)
        .with_application_logger(None)
        .summary()
        .build(model, optimizer, scheduler);

    // Training
    let now = Instant::now();
    guard_out_of_memory(|| learner.fit(dataloader_train, dataloader_valid))?;
    let elapsed = now.elapsed().as_secs();
    tracing::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    // Best epoch
    let eval_batcher = InferenceBatcher::new(tokenizer.clone(), config.max_seq_len, padding);
    let (best_epoch, validation_macro_f1, best_model) = select_best_checkpoint::<B::InnerBackend>(
        &artifact_dir,
        &model_config,
        &eval_batcher,
        &splits.validation,
        config.eval_batch_size,
        &device,
    )?;
    tracing::info!("Best epoch {best_epoch} (validation macro F1 {validation_macro_f1:.4})");

    best_model
        .save_file(artifact_dir.join(MODEL_RECORD), &ModelRecorder::new())
        .map_err(|e| PipelineError::Record(e.to_string()))?;
    model_config.save_trained(artifact_dir.join(CONFIG_FILE))?;
    tokenizer.save(artifact_dir.join(TOKENIZER_FILE))?;
    labels.save(artifact_dir.join(LABELS_FILE))?;
    tracing::info!("Model saved to {}", artifact_dir.display());

    Ok(TrainingSummary {
        train_size,
        validation_size,
        test_size,
        best_epoch,
        validation_macro_f1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::lr_scheduler::LrScheduler;

    fn config() -> TrainingConfig {
        TrainingConfig::new("model".into(), "out".into())
            .with_batch_size(16)
            .with_grad_accumulation(2)
            .with_num_epochs(2)
    }

    #[test]
    fn total_steps_count_every_batch() {
        // 100 samples -> 7 batches per epoch, accumulation does not change the count
        assert_eq!(config().total_steps(100), 14);
        assert_eq!(config().with_grad_accumulation(4).total_steps(100), 14);
    }

    #[test]
    fn schedule_decays_over_the_whole_run() {
        let config = config();
        let train_size = 100;
        let mut scheduler = WarmupLinearScheduler::with_warmup_ratio(
            config.learning_rate,
            config.warmup_ratio,
            config.total_steps(train_size),
        );

        let batches = train_size.div_ceil(config.batch_size) * config.num_epochs;
        let rates: Vec<f64> = (0..batches).map(|_| scheduler.step()).collect();

        assert!(rates[1..].iter().all(|rate| *rate > 0.0), "{rates:?}");
        assert_eq!(scheduler.step(), 0.0);
    }

    #[test]
    fn every_epoch_keeps_its_checkpoint() {
        assert_eq!(config().checkpoints_to_keep(), 2);
        assert_eq!(config().with_num_epochs(5).checkpoints_to_keep(), 5);
    }

    #[test]
    fn artifact_dir_drops_stale_learner_output_only() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("model");
        for stale in [CHECKPOINT_DIR, "train", "valid"] {
            std::fs::create_dir_all(artifact_dir.join(stale).join("epoch-1")).unwrap();
        }
        std::fs::write(artifact_dir.join(MODEL_RECORD), b"weights").unwrap();

        create_artifact_dir(&artifact_dir).unwrap();

        for stale in [CHECKPOINT_DIR, "train", "valid"] {
            assert!(!artifact_dir.join(stale).exists());
        }
        assert!(artifact_dir.join(MODEL_RECORD).exists());

        // Fresh directory: nothing to remove
        create_artifact_dir(&dir.path().join("fresh")).unwrap();
        assert!(dir.path().join("fresh").is_dir());
    }

    #[test]
    #[cfg(unix)]
    fn artifact_dir_reports_removal_failures() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the checkpoint directory should be cannot be removed as a directory
        std::fs::write(dir.path().join(CHECKPOINT_DIR), b"").unwrap();

        assert!(matches!(
            create_artifact_dir(dir.path()),
            Err(PipelineError::Io(_))
        ));
    }

    #[test]
    fn out_of_memory_panics_become_errors() {
        let result = guard_out_of_memory(|| -> usize {
            panic!("CUDA out of memory. Tried to allocate 2.00 GiB")
        });

        assert!(matches!(result, Err(PipelineError::OutOfMemory)));
    }

    #[test]
    fn values_pass_through_the_guard() {
        assert_eq!(guard_out_of_memory(|| 3).unwrap(), 3);
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn other_panics_keep_unwinding() {
        let _ = guard_out_of_memory(|| -> usize { panic!("index out of bounds") });
    }

    #[test]
    fn oom_error_suggests_smaller_batches() {
        let message = PipelineError::OutOfMemory.to_string();

        assert!(message.contains("ELECTRA_TRAIN_BS=8 ELECTRA_GRAD_ACCUM=4"));
    }
}
