use serde::{Deserialize, Serialize};
use std::fmt;

/// A label as it appears in the input file.
///
/// Integer columns keep their numeric ordering; any other dtype is read as text.
/// The derived ordering puts every integer before every text label.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelValue::Int(value) => write!(f, "{value}"),
            LabelValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for LabelValue {
    fn from(value: i64) -> Self {
        LabelValue::Int(value)
    }
}

impl From<i32> for LabelValue {
    fn from(value: i32) -> Self {
        LabelValue::Int(value.into())
    }
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        LabelValue::Text(value.to_string())
    }
}

/// A row as read from disk, before cleaning.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRecord {
    pub body: Option<String>,
    pub label: LabelValue,
}

impl RawRecord {
    pub fn new(body: impl Into<String>, label: impl Into<LabelValue>) -> Self {
        Self {
            body: Some(body.into()),
            label: label.into(),
        }
    }
}

/// A cleaned row: non-empty, whitespace-normalized, at most 256 characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub body: String,
    pub label: LabelValue,
}

impl From<Record> for RawRecord {
    fn from(record: Record) -> Self {
        RawRecord {
            body: Some(record.body),
            label: record.label,
        }
    }
}

/// A cleaned row with its contiguous label id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedRecord {
    pub body: String,
    pub label: usize,
}

/// A record whose body went through the tokenizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenizedRecord {
    pub tokens: Vec<usize>,
    pub label: usize,
}

/// Train, validation and test partitions of one dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetSplits {
    pub train: Vec<EncodedRecord>,
    pub validation: Vec<EncodedRecord>,
    pub test: Vec<EncodedRecord>,
}

impl DatasetSplits {
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.validation.len(), self.test.len())
    }
}
