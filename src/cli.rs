//! Command line and environment configuration.
//!
//! Every option can be given as a flag or through the environment variable named in
//! its help text.

use crate::data::DEFAULT_DATASET_PATH;
use crate::evaluation::EvaluationConfig;
use crate::export::{ExportConfig, DEFAULT_EXPORT_MAX_SEQ_LEN, PROBE_TEXT};
use crate::training::TrainingConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

pub const ELECTRA_SMALL: &str = "google/electra-small-discriminator";
pub const ROBERTA_BASE: &str = "roberta-base";
pub const DEFAULT_TOKENIZER_DIR: &str = "android_tokenizer";
pub const DEFAULT_EXPORT_DIR: &str = "electra_small_android_export";

/// A named training/evaluation recipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// ELECTRA-small, 128 tokens.
    Electra,
    /// ELECTRA-small, 64 tokens, for on-device inference.
    ElectraMobile,
    /// RoBERTa-base, 128 tokens.
    Roberta,
}

impl Profile {
    pub fn model_name(&self) -> &'static str {
        match self {
            Profile::Electra | Profile::ElectraMobile => ELECTRA_SMALL,
            Profile::Roberta => ROBERTA_BASE,
        }
    }

    /// Output directory under the models root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Profile::Electra => "electra_small_model",
            Profile::ElectraMobile => "electra_small_android",
            Profile::Roberta => "roberta_model",
        }
    }

    pub fn max_seq_len(&self) -> usize {
        match self {
            Profile::ElectraMobile => 64,
            Profile::Electra | Profile::Roberta => 128,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Profile::Roberta => 2e-5,
            Profile::Electra | Profile::ElectraMobile => 3e-5,
        }
    }

    pub fn num_epochs(&self) -> usize {
        match self {
            Profile::Roberta => 3,
            Profile::Electra | Profile::ElectraMobile => 2,
        }
    }

    /// Default evaluation batch size.
    pub fn eval_batch_size(&self, accelerated: bool) -> usize {
        match (self, accelerated) {
            (Profile::ElectraMobile, true) => 128,
            (Profile::ElectraMobile, false) => 32,
            _ => 16,
        }
    }

    /// Whether evaluation scores the latest epoch checkpoint rather than the final weights.
    pub fn prefer_checkpoint(&self) -> bool {
        !matches!(self, Profile::ElectraMobile)
    }

    /// Whether evaluation prints the latency report.
    pub fn measures_latency(&self) -> bool {
        matches!(self, Profile::ElectraMobile)
    }
}

#[derive(Parser, Debug)]
#[command(name = "electra-burn", version, about = "Fine-tune and export notification classifiers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Input parquet or csv file with `body` and `label` columns
    #[arg(long, env = "DATASET_PATH", default_value = DEFAULT_DATASET_PATH, global = true)]
    pub dataset: PathBuf,

    /// Root directory of trained models
    #[arg(long, env = "MODELS_DIR", default_value = "models", global = true)]
    pub models_dir: PathBuf,

    /// Run on the CPU backend even when a GPU backend is compiled in
    #[arg(
        long,
        env = "APP_FORCE_CPU",
        global = true,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub force_cpu: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and clean the dataset, then print its shape and class distribution
    Prepare(PrepareArgs),
    /// Download a hub tokenizer into a local directory
    FetchTokenizer(FetchTokenizerArgs),
    /// Fine-tune a pretrained encoder
    Train(TrainArgs),
    /// Score a trained model on the test split
    Evaluate(EvaluateArgs),
    /// Write the quantized mobile bundle
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// Rows of the cleaned dataset to print
    #[arg(long, default_value_t = 5)]
    pub preview: usize,
}

#[derive(Args, Debug)]
pub struct FetchTokenizerArgs {
    #[arg(long, env = "MODEL_NAME", default_value = ELECTRA_SMALL)]
    pub model_name: String,

    #[arg(long, default_value = DEFAULT_TOKENIZER_DIR)]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, value_enum, default_value_t = Profile::Electra)]
    pub profile: Profile,

    /// Hub model id or local directory; defaults to the profile's model
    #[arg(long, env = "MODEL_NAME")]
    pub model_name: Option<String>,

    #[arg(long, env = "ELECTRA_TRAIN_BS", default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, env = "ELECTRA_EVAL_BS", default_value_t = 32)]
    pub eval_batch_size: usize,

    #[arg(long, env = "ELECTRA_GRAD_ACCUM", default_value_t = 2)]
    pub grad_accum: usize,

    #[arg(long, env = "ELECTRA_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Defaults to the profile's sequence length
    #[arg(long, env = "ELECTRA_MAX_LENGTH")]
    pub max_length: Option<usize>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
}

impl TrainArgs {
    pub fn into_config(self, models_dir: &Path, accelerated: bool) -> TrainingConfig {
        let profile = self.profile;
        let model_name = self
            .model_name
            .unwrap_or_else(|| profile.model_name().to_string());
        let output_dir = models_dir.join(profile.dir_name());

        TrainingConfig::new(model_name, output_dir.to_string_lossy().into_owned())
            .with_num_epochs(self.epochs.unwrap_or(profile.num_epochs()))
            .with_batch_size(self.batch_size)
            .with_eval_batch_size(self.eval_batch_size)
            .with_grad_accumulation(self.grad_accum)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
            .with_learning_rate(self.learning_rate.unwrap_or(profile.learning_rate()))
            .with_max_seq_len(self.max_length.unwrap_or(profile.max_seq_len()))
            .with_pad_to_multiple_of(accelerated.then_some(8))
    }
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(long, value_enum, default_value_t = Profile::Electra)]
    pub profile: Profile,

    /// Hub model id for the tokenizer when the model dir has none
    #[arg(long, env = "MODEL_NAME")]
    pub model_name: Option<String>,

    /// Defaults to the profile's model directory
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Defaults to the profile's sequence length
    #[arg(long, env = "EVAL_MAX_LENGTH")]
    pub max_length: Option<usize>,

    /// Defaults to 16, or 32 on CPU / 128 on GPU for the mobile profile
    #[arg(long, env = "EVAL_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Test samples to score, 0 for all
    #[arg(long, env = "EVAL_MAX_SAMPLES", default_value_t = 0)]
    pub max_samples: usize,

    #[arg(long, env = "APP_LATENCY_RUNS", default_value_t = 30)]
    pub latency_runs: usize,

    #[arg(long, env = "ELECTRA_SEED", default_value_t = 42)]
    pub seed: u64,
}

impl EvaluateArgs {
    pub fn into_config(self, models_dir: &Path, accelerated: bool) -> EvaluationConfig {
        let profile = self.profile;

        EvaluationConfig {
            model_dir: self
                .model_dir
                .unwrap_or_else(|| models_dir.join(profile.dir_name())),
            model_name: self
                .model_name
                .unwrap_or_else(|| profile.model_name().to_string()),
            max_seq_len: self.max_length.unwrap_or(profile.max_seq_len()),
            batch_size: self
                .batch_size
                .unwrap_or(profile.eval_batch_size(accelerated)),
            max_samples: self.max_samples,
            seed: self.seed,
            prefer_checkpoint: profile.prefer_checkpoint(),
            latency_runs: profile.measures_latency().then_some(self.latency_runs),
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Defaults to the mobile profile's model directory
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_EXPORT_MAX_SEQ_LEN)]
    pub max_length: usize,

    #[arg(long, default_value = PROBE_TEXT)]
    pub probe_text: String,
}

impl ExportArgs {
    pub fn into_config(self, models_dir: &Path, dataset_path: &Path) -> ExportConfig {
        ExportConfig {
            model_dir: self
                .model_dir
                .unwrap_or_else(|| models_dir.join(Profile::ElectraMobile.dir_name())),
            export_dir: self
                .export_dir
                .unwrap_or_else(|| models_dir.join(DEFAULT_EXPORT_DIR)),
            max_seq_len: self.max_length,
            probe_text: self.probe_text,
            dataset_path: dataset_path.to_path_buf(),
        }
    }
}
