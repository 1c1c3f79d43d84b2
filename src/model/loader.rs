use super::classifier::ElectraClassifier;
use super::config::CONFIG_FILE;
use crate::data::TOKENIZER_FILE;
use crate::error::{PipelineError, Result};
use burn::tensor::backend::Backend;
use burn_store::{ApplyResult, KeyRemapper, ModuleSnapshot, PyTorchToBurnAdapter, SafetensorsStore};
use std::path::{Path, PathBuf};

pub const WEIGHTS_FILE: &str = "model.safetensors";

const BACKBONE_PREFIX: &str = "backbone.";

/// Outcome of applying a pretrained checkpoint to the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub applied: usize,
    /// Model tensors the checkpoint has no value for.
    pub missing: Vec<String>,
    /// Checkpoint tensors with no counterpart in the model.
    pub unused: Vec<String>,
}

impl LoadSummary {
    /// Missing tensors of the encoder. Only the classification head may stay random.
    pub fn missing_backbone(&self) -> Vec<String> {
        self.missing
            .iter()
            .filter(|path| path.starts_with(BACKBONE_PREFIX))
            .cloned()
            .collect()
    }

    pub fn ensure_backbone_loaded(&self) -> Result<()> {
        let missing = self.missing_backbone();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::MissingWeights(missing))
        }
    }
}

impl From<ApplyResult> for LoadSummary {
    fn from(result: ApplyResult) -> Self {
        Self {
            applied: result.applied.len(),
            missing: result.missing,
            unused: result.unused,
        }
    }
}

/// Load pre-trained encoder weights from a safetensors file into the model.
///
/// # Key Mappings
/// Maps Hugging Face ELECTRA/RoBERTa/BERT naming to the classifier structure:
/// - `{electra,roberta,bert}.*` → `backbone.*`
/// - `encoder.layer.{i}.*` → `encoder.layers.{i}.*`
/// - `attention.self.query/key/value` → `mha.query/key/value`
/// - `attention.output.dense` → `mha.output`
/// - `intermediate.dense` → `pwff.linear_inner`
/// - `output.dense` → `pwff.linear_outer`
/// - `LayerNorm.weight/bias` → `gamma/beta`
///
/// `classifier.dense` and `classifier.out_proj` load when the checkpoint already has a
/// sequence classification head; otherwise the head keeps its random initialization.
/// Any encoder tensor left without a value fails with [`PipelineError::MissingWeights`].
pub fn load_pretrained<B: Backend>(
    model: &mut ElectraClassifier<B>,
    checkpoint_path: impl AsRef<Path>,
) -> Result<LoadSummary> {
    let key_mappings: Vec<(&str, &str)> = vec![
        ("^(electra|roberta|bert)\\.(.+)", "backbone.$2"),
        ("encoder\\.layer\\.([0-9]+)", "encoder.layers.$1"),
        ("attention\\.self\\.query", "mha.query"),
        ("attention\\.self\\.key", "mha.key"),
        ("attention\\.self\\.value", "mha.value"),
        ("attention\\.output\\.dense", "mha.output"),
        ("attention\\.output\\.LayerNorm", "norm_1"),
        ("intermediate\\.dense", "pwff.linear_inner"),
        // Must not match attention.output.dense, which is rewritten above.
        ("(layers\\.[0-9]+)\\.output\\.dense", "$1.pwff.linear_outer"),
        ("(layers\\.[0-9]+)\\.output\\.LayerNorm", "$1.norm_2"),
        (
            "embeddings\\.LayerNorm\\.weight",
            "embeddings.layer_norm.gamma",
        ),
        ("embeddings\\.LayerNorm\\.bias", "embeddings.layer_norm.beta"),
        ("(norm_[12])\\.weight", "$1.gamma"),
        ("(norm_[12])\\.bias", "$1.beta"),
    ];

    let remapper =
        KeyRemapper::from_patterns(key_mappings).map_err(|e| PipelineError::Store(e.to_string()))?;

    let checkpoint_path: PathBuf = checkpoint_path.as_ref().to_path_buf();
    let mut store = SafetensorsStore::from_file(checkpoint_path)
        .with_from_adapter(PyTorchToBurnAdapter)
        .remap(remapper)
        .allow_partial(true);

    let result = model
        .load_from(&mut store)
        .map_err(|e| PipelineError::Store(e.to_string()))?;
    if !result.is_success() {
        let errors: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
        return Err(PipelineError::Store(errors.join("; ")));
    }

    let summary = LoadSummary::from(result);
    tracing::info!(
        "Loaded {} pretrained tensors ({} missing, {} unused)",
        summary.applied,
        summary.missing.len(),
        summary.unused.len()
    );
    if !summary.missing.is_empty() {
        tracing::info!("Randomly initialized: {:?}", summary.missing);
    }
    tracing::debug!("Unused checkpoint tensors: {:?}", summary.unused);
    summary.ensure_backbone_loaded()?;

    Ok(summary)
}

/// Paths of the files making up a pretrained model.
#[derive(Debug, Clone)]
pub struct HfModelFiles {
    pub config_path: PathBuf,
    pub weights_path: PathBuf,
    pub tokenizer_path: PathBuf,
}

impl HfModelFiles {
    /// Files of a model saved in a local directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_path: dir.join(CONFIG_FILE),
            weights_path: dir.join(WEIGHTS_FILE),
            tokenizer_path: dir.join(TOKENIZER_FILE),
        }
    }
}

#[cfg(feature = "pretrained")]
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("burn-models")
}

#[cfg(feature = "pretrained")]
fn hub_repo(model_name: &str, cache_dir: Option<PathBuf>) -> Result<hf_hub::api::sync::ApiRepo> {
    let cache_dir = cache_dir.unwrap_or_else(default_cache_dir);
    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_cache_dir(cache_dir)
        .build()
        .map_err(|e| PipelineError::Download(format!("Failed to create HF API: {e}")))?;

    Ok(api.model(model_name.to_string()))
}

/// Download model files from Hugging Face Hub.
///
/// Files are cached and won't be re-downloaded if they exist.
#[cfg(feature = "pretrained")]
pub fn download_hf_model(model_name: &str, cache_dir: Option<PathBuf>) -> Result<HfModelFiles> {
    let repo = hub_repo(model_name, cache_dir)?;
    let get = |file: &str| {
        repo.get(file)
            .map_err(|e| PipelineError::Download(format!("Failed to download {file}: {e}")))
    };

    Ok(HfModelFiles {
        config_path: get(CONFIG_FILE)?,
        weights_path: get(WEIGHTS_FILE)?,
        tokenizer_path: get(TOKENIZER_FILE)?,
    })
}

/// Download the tokenizer of a hub model.
///
/// `tokenizer.json` is required; the other tokenizer files are fetched when the
/// repository has them. Returns the paths of every file fetched.
#[cfg(feature = "pretrained")]
pub fn download_hf_tokenizer(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    let repo = hub_repo(model_name, cache_dir)?;

    let mut files = vec![repo.get(TOKENIZER_FILE).map_err(|e| {
        PipelineError::Download(format!("Failed to download {TOKENIZER_FILE}: {e}"))
    })?];
    let optional_files = [
        "tokenizer_config.json",
        "special_tokens_map.json",
        "vocab.txt",
        "vocab.json",
        "merges.txt",
    ];
    for optional in optional_files {
        match repo.get(optional) {
            Ok(path) => files.push(path),
            Err(err) => tracing::debug!("{model_name} has no {optional}: {err}"),
        }
    }

    Ok(files)
}

/// Resolves a model name to local files.
///
/// A directory containing config.json is used as is; anything else is treated as a
/// hub model id and downloaded.
pub fn resolve_model_files(model_name: &str) -> Result<HfModelFiles> {
    let local = Path::new(model_name);
    if local.join(CONFIG_FILE).exists() {
        return Ok(HfModelFiles::in_dir(local));
    }

    #[cfg(feature = "pretrained")]
    {
        tracing::info!("Fetching {model_name} from the Hugging Face Hub");
        download_hf_model(model_name, None)
    }

    #[cfg(not(feature = "pretrained"))]
    {
        Err(PipelineError::ModelDirNotFound(local.to_path_buf()))
    }
}

/// Resolves the tokenizer file for a model name, local directory first.
pub fn resolve_tokenizer_file(model_name: &str) -> Result<PathBuf> {
    let local = Path::new(model_name).join(TOKENIZER_FILE);
    if local.exists() {
        return Ok(local);
    }

    #[cfg(feature = "pretrained")]
    {
        hub_repo(model_name, None)?.get(TOKENIZER_FILE).map_err(|e| {
            PipelineError::Download(format!("Failed to download {TOKENIZER_FILE}: {e}"))
        })
    }

    #[cfg(not(feature = "pretrained"))]
    {
        Err(PipelineError::ModelDirNotFound(local))
    }
}
