use super::record::{EncodedRecord, LabelValue, Record};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const LABELS_FILE: &str = "labels.json";

/// Bijection between label values and contiguous ids `0..n`.
///
/// Ids follow the sorted order of the label values so that the same label set always
/// produces the same mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    values: Vec<LabelValue>,
}

impl LabelMapping {
    pub fn fit(records: &[Record]) -> Self {
        let values: BTreeSet<LabelValue> = records.iter().map(|r| r.label.clone()).collect();

        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn num_labels(&self) -> usize {
        self.values.len()
    }

    pub fn encode(&self, label: &LabelValue) -> Option<usize> {
        self.values.binary_search(label).ok()
    }

    pub fn decode(&self, id: usize) -> Option<&LabelValue> {
        self.values.get(id)
    }

    pub fn id2label(&self) -> BTreeMap<usize, String> {
        self.values
            .iter()
            .enumerate()
            .map(|(id, value)| (id, value.to_string()))
            .collect()
    }

    pub fn label2id(&self) -> BTreeMap<String, usize> {
        self.values
            .iter()
            .enumerate()
            .map(|(id, value)| (value.to_string(), id))
            .collect()
    }

    pub fn encode_records(&self, records: Vec<Record>) -> Result<Vec<EncodedRecord>> {
        records
            .into_iter()
            .map(|record| {
                let label = self
                    .encode(&record.label)
                    .ok_or_else(|| PipelineError::UnknownLabel(record.label.to_string()))?;
                Ok(EncodedRecord {
                    body: record.body,
                    label,
                })
            })
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut mapping: Self = serde_json::from_str(&content)?;
        mapping.values.sort();
        mapping.values.dedup();
        Ok(mapping)
    }

    /// Loads `labels.json` from `model_dir`, or refits from `records` when it is absent.
    pub fn load_or_fit(model_dir: &Path, records: &[Record]) -> Result<Self> {
        let path = model_dir.join(LABELS_FILE);
        if path.exists() {
            return Self::load(path);
        }

        tracing::warn!(
            "{} not found, recomputing the label mapping from the dataset",
            path.display()
        );
        Ok(Self::fit(records))
    }
}
