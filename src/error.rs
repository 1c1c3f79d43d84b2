use std::path::PathBuf;
use thiserror::Error;

/// Batch size and accumulation that fit an ELECTRA-small run on a small GPU.
pub const OOM_REMEDIATION: &str = "ELECTRA_TRAIN_BS=8 ELECTRA_GRAD_ACCUM=4";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Dataset not found: {}", .0.display())]
    DatasetNotFound(PathBuf),

    #[error("Model directory not found: {}", .0.display())]
    ModelDirNotFound(PathBuf),

    #[error("No trained model in {}: expected a checkpoint or model.mpk", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Invalid column '{column}': {reason}")]
    InvalidColumn { column: String, reason: String },

    #[error("Unsupported dataset format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Unknown label '{0}'")]
    UnknownLabel(String),

    #[error("Label mapping has {found} labels but the model expects {expected}")]
    LabelCountMismatch { expected: usize, found: usize },

    #[error("Split error: {0}")]
    Split(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Weight store error: {0}")]
    Store(String),

    #[error("Pretrained checkpoint has no weights for {} encoder tensors: {}", .0.len(), .0.join(", "))]
    MissingWeights(Vec<String>),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Record error: {0}")]
    Record(String),

    #[error("Tensor data error: {0}")]
    TensorData(String),

    #[error("Unexpected graph input '{0}'")]
    UnexpectedGraphInput(String),

    #[error("Out of memory during training. Try a smaller batch, e.g. {OOM_REMEDIATION}")]
    OutOfMemory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
