use super::clean::{check_schema, clean_records, BODY_COLUMN, LABEL_COLUMN};
use super::record::{LabelValue, RawRecord, Record};
use crate::error::{PipelineError, Result};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

pub const DEFAULT_DATASET_PATH: &str = "data/merged_dataset.parquet";

/// Reads a parquet or csv file into a data frame.
pub fn read_frame(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(PipelineError::DatasetNotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let df = match extension.as_deref() {
        Some("parquet") => ParquetReader::new(File::open(path)?).finish()?,
        Some("csv") => CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        _ => return Err(PipelineError::UnsupportedFormat(path.to_path_buf())),
    };

    Ok(df)
}

/// Extracts `body` and `label` from a frame, coercing the body to text.
pub fn raw_records(df: &DataFrame) -> Result<Vec<RawRecord>> {
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    check_schema(&columns)?;

    let body = df
        .column(BODY_COLUMN)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    let labels = label_values(df.column(LABEL_COLUMN)?.as_materialized_series())?;

    let records = body
        .str()?
        .into_iter()
        .zip(labels)
        .map(|(body, label)| RawRecord {
            body: body.map(str::to_string),
            label,
        })
        .collect();

    Ok(records)
}

fn label_values(series: &Series) -> Result<Vec<LabelValue>> {
    let null_label = || PipelineError::InvalidColumn {
        column: LABEL_COLUMN.to_string(),
        reason: "contains null values".to_string(),
    };

    if series.dtype().is_integer() {
        let ints = series.cast(&DataType::Int64)?;
        ints.i64()?
            .into_iter()
            .map(|value| value.map(LabelValue::Int).ok_or_else(null_label))
            .collect()
    } else {
        let text = series.cast(&DataType::String)?;
        text.str()?
            .into_iter()
            .map(|value| value.map(LabelValue::from).ok_or_else(null_label))
            .collect()
    }
}

/// Loads and cleans the dataset at `path`.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let df = read_frame(path)?;
    tracing::info!("Original dataset shape: {:?}", df.shape());

    let raw = raw_records(&df)?;
    let records = clean_records(raw);
    tracing::info!("Cleaned dataset shape: ({}, 2)", records.len());

    for (label, count) in class_distribution(&records) {
        tracing::info!("  label {label}: {count}");
    }

    Ok(records)
}

/// Label counts, most frequent first; ties ordered by label.
pub fn class_distribution(records: &[Record]) -> Vec<(LabelValue, usize)> {
    let mut counts: HashMap<&LabelValue, usize> = HashMap::new();
    for record in records {
        *counts.entry(&record.label).or_default() += 1;
    }

    let mut counts: Vec<(LabelValue, usize)> = counts
        .into_iter()
        .map(|(label, count)| (label.clone(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_is_sorted_by_count() {
        let records = vec![
            Record {
                body: "first message".into(),
                label: LabelValue::Int(1),
            },
            Record {
                body: "second message".into(),
                label: LabelValue::Int(0),
            },
            Record {
                body: "third message".into(),
                label: LabelValue::Int(1),
            },
        ];

        assert_eq!(
            class_distribution(&records),
            vec![(LabelValue::Int(1), 2), (LabelValue::Int(0), 1)]
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_dataset("does/not/exist.parquet").unwrap_err();

        assert!(matches!(err, PipelineError::DatasetNotFound(_)));
    }
}
