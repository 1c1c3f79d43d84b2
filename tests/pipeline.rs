//! Dataset loading, cleaning and splitting on a csv written to a temporary directory.

use electra_burn::data::{
    class_distribution, load_dataset, stratified_split, LabelMapping, LabelValue,
    MAX_BODY_CHARS, MIN_BODY_CHARS,
};
use electra_burn::error::PipelineError;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

const CLASS_SIZES: [(i64, usize); 3] = [(0, 60), (1, 30), (2, 10)];

fn write_csv(dir: &Path, name: &str, header: &str, rows: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{header}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    path
}

fn notification_rows() -> Vec<String> {
    let mut rows = Vec::new();
    for (label, count) in CLASS_SIZES {
        for i in 0..count {
            rows.push(format!("\"Notification {i} for   class {label}\",{label}"));
        }
    }

    // Removed by cleaning
    rows.push("\"ok\",0".to_string());
    rows.push("\"   \",1".to_string());
    rows.push("\"Notification 0 for class 0\",0".to_string());
    rows
}

#[test]
fn cleaned_dataset_keeps_unique_bodies() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "data.csv", "body,label", &notification_rows());

    let records = load_dataset(&path).unwrap();

    assert_eq!(records.len(), 100);
    let bodies: HashSet<&str> = records.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies.len(), records.len());
    for record in &records {
        let chars = record.body.chars().count();
        assert!(chars > MIN_BODY_CHARS && chars <= MAX_BODY_CHARS);
        assert!(!record.body.contains("  "));
        assert_eq!(record.body.trim(), record.body);
    }

    let distribution = class_distribution(&records);
    assert_eq!(
        distribution,
        vec![
            (LabelValue::Int(0), 60),
            (LabelValue::Int(1), 30),
            (LabelValue::Int(2), 10),
        ]
    );
}

#[test]
fn split_is_stratified_and_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "data.csv", "body,label", &notification_rows());

    let records = load_dataset(&path).unwrap();
    let labels = LabelMapping::fit(&records);
    let splits = stratified_split(labels.encode_records(records).unwrap(), 42).unwrap();

    assert_eq!(splits.sizes(), (80, 10, 10));

    let train: HashSet<&str> = splits.train.iter().map(|r| r.body.as_str()).collect();
    let validation: HashSet<&str> = splits.validation.iter().map(|r| r.body.as_str()).collect();
    let test: HashSet<&str> = splits.test.iter().map(|r| r.body.as_str()).collect();
    assert!(train.is_disjoint(&validation));
    assert!(train.is_disjoint(&test));
    assert!(validation.is_disjoint(&test));

    for partition in [&splits.train, &splits.validation, &splits.test] {
        let classes: HashSet<usize> = partition.iter().map(|r| r.label).collect();
        assert_eq!(classes.len(), 3);
    }
    let train_minority = splits.train.iter().filter(|r| r.label == 2).count();
    assert_eq!(train_minority, 8);
}

#[test]
fn split_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "data.csv", "body,label", &notification_rows());

    let split = || {
        let records = load_dataset(&path).unwrap();
        let labels = LabelMapping::fit(&records);
        stratified_split(labels.encode_records(records).unwrap(), 7).unwrap()
    };

    assert_eq!(split(), split());
}

#[test]
fn text_labels_are_supported() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..20)
        .map(|i| {
            let label = if i % 2 == 0 { "spam" } else { "ham" };
            format!("\"Message number {i}\",{label}")
        })
        .collect();
    let path = write_csv(dir.path(), "data.csv", "body,label", &rows);

    let records = load_dataset(&path).unwrap();
    let labels = LabelMapping::fit(&records);

    assert_eq!(labels.num_labels(), 2);
    assert_eq!(labels.decode(0), Some(&LabelValue::from("ham")));
    assert_eq!(labels.decode(1), Some(&LabelValue::from("spam")));
}

#[test]
fn missing_body_column_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec!["\"Some notification\",0".to_string()];
    let path = write_csv(dir.path(), "data.csv", "text,label", &rows);

    let err = load_dataset(&path).unwrap_err();

    assert!(matches!(&err, PipelineError::MissingColumns(columns) if columns == &["body"]));
    assert_eq!(err.to_string(), "Missing columns: body");
}

#[test]
fn unknown_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "data.txt", "body,label", &[]);

    assert!(matches!(
        load_dataset(&path),
        Err(PipelineError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        load_dataset(dir.path().join("missing.parquet")),
        Err(PipelineError::DatasetNotFound(_))
    ));
}
