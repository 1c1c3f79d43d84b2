//! Notification text classification with fine-tuned ELECTRA and RoBERTa encoders.
//!
//! The pipeline covers:
//! - [`data`] - loading, cleaning, label encoding and stratified splitting of the dataset
//! - [`model`] - the encoder with a sequence classification head and pretrained weight loading
//! - [`training`] - fine-tuning with the burn learner and best-epoch selection
//! - [`evaluation`] - test split metrics and on-device latency estimates
//! - [`export`] - the int8 quantized bundle for mobile inference
//!
//! # Example
//!
//! ```ignore
//! use burn::backend::{Autodiff, NdArray};
//! use electra_burn::training::{train, TrainingConfig};
//!
//! type B = Autodiff<NdArray<f32>>;
//!
//! let config = TrainingConfig::new(
//!     "google/electra-small-discriminator".into(),
//!     "models/electra_small_model".into(),
//! );
//! let summary = train::<B>("data/merged_dataset.parquet".as_ref(), config, Default::default())?;
//! ```

#[macro_use]
extern crate derive_new;

pub mod cli;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod model;
pub mod training;
