use crate::error::{PipelineError, Result};
use crate::model::ElectraClassifier;
use burn::module::Module;
use burn::record::{CompactRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};

/// Directory the learner's file checkpointer writes into.
pub const CHECKPOINT_DIR: &str = "checkpoint";
/// Final weights, without extension (the recorder appends `.mpk`).
pub const MODEL_RECORD: &str = "model";

/// Recorder of the final weights and of the exported bundle.
pub type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// A set of saved weights inside a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Learner checkpoint of one epoch, written with [`CompactRecorder`].
    Checkpoint { epoch: usize, path: PathBuf },
    /// Final weights written with [`ModelRecorder`].
    Final(PathBuf),
}

impl ModelSource {
    pub fn path(&self) -> &Path {
        match self {
            ModelSource::Checkpoint { path, .. } | ModelSource::Final(path) => path,
        }
    }

    /// Loads these weights into `model`.
    pub fn load<B: Backend>(
        &self,
        model: ElectraClassifier<B>,
        device: &B::Device,
    ) -> Result<ElectraClassifier<B>> {
        let record = match self {
            ModelSource::Checkpoint { path, .. } => CompactRecorder::new().load(path.clone(), device),
            ModelSource::Final(path) => ModelRecorder::new().load(path.clone(), device),
        }
        .map_err(|e| PipelineError::Record(e.to_string()))?;

        Ok(model.load_record(record))
    }
}

fn checkpoint_epoch(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("model-")?
        .strip_suffix(".mpk")?
        .parse()
        .ok()
}

/// Epoch checkpoints of `model_dir`, oldest first.
pub fn list_checkpoints(model_dir: &Path) -> Result<Vec<ModelSource>> {
    let dir = model_dir.join(CHECKPOINT_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut checkpoints = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(epoch) = name.to_str().and_then(checkpoint_epoch) {
            checkpoints.push(ModelSource::Checkpoint {
                epoch,
                path: dir.join(format!("model-{epoch}")),
            });
        }
    }

    checkpoints.sort_by_key(|source| match source {
        ModelSource::Checkpoint { epoch, .. } => *epoch,
        ModelSource::Final(_) => usize::MAX,
    });
    Ok(checkpoints)
}

/// Picks the weights to evaluate.
///
/// With `prefer_checkpoint` the most recent epoch checkpoint wins over the final
/// weights; otherwise the final weights win. Fails when neither exists.
pub fn resolve_model_source(model_dir: &Path, prefer_checkpoint: bool) -> Result<ModelSource> {
    if !model_dir.is_dir() {
        return Err(PipelineError::ModelDirNotFound(model_dir.to_path_buf()));
    }

    let latest = list_checkpoints(model_dir)?.pop();
    let final_record = model_dir.join(MODEL_RECORD);
    let has_final = final_record.with_extension("mpk").exists();

    match (latest, has_final) {
        (Some(checkpoint), _) if prefer_checkpoint => Ok(checkpoint),
        (_, true) => Ok(ModelSource::Final(final_record)),
        (Some(checkpoint), false) => Ok(checkpoint),
        (None, false) => Err(PipelineError::ModelNotFound(model_dir.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: PathBuf) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn checkpoint_names_are_parsed() {
        assert_eq!(checkpoint_epoch("model-12.mpk"), Some(12));
        assert_eq!(checkpoint_epoch("optim-12.mpk"), None);
        assert_eq!(checkpoint_epoch("model-final.mpk"), None);
    }

    #[test]
    fn latest_checkpoint_is_numeric_not_lexical() {
        let dir = tempfile::tempdir().unwrap();
        for epoch in [2, 10, 9] {
            touch(dir.path().join(CHECKPOINT_DIR).join(format!("model-{epoch}.mpk")));
        }
        touch(dir.path().join(CHECKPOINT_DIR).join("optim-10.mpk"));

        let source = resolve_model_source(dir.path(), true).unwrap();

        assert!(matches!(source, ModelSource::Checkpoint { epoch: 10, .. }));
    }

    #[test]
    fn final_weights_are_used_without_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path().join("model.mpk"));

        let source = resolve_model_source(dir.path(), true).unwrap();

        assert_eq!(source, ModelSource::Final(dir.path().join(MODEL_RECORD)));
    }

    #[test]
    fn final_weights_win_when_checkpoints_are_not_preferred() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path().join("model.mpk"));
        touch(dir.path().join(CHECKPOINT_DIR).join("model-1.mpk"));

        let source = resolve_model_source(dir.path(), false).unwrap();

        assert!(matches!(source, ModelSource::Final(_)));
    }

    #[test]
    fn empty_directory_has_no_model() {
        let dir = tempfile::tempdir().unwrap();

        let err = resolve_model_source(dir.path(), true).unwrap_err();

        assert!(matches!(err, PipelineError::ModelNotFound(_)));
    }

    #[test]
    fn missing_directory_is_reported() {
        let err = resolve_model_source(Path::new("no/such/model"), true).unwrap_err();

        assert!(matches!(err, PipelineError::ModelDirNotFound(_)));
    }
}
