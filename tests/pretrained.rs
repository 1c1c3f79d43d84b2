//! Loads the ELECTRA-small discriminator from the Hugging Face Hub.
//!
//! Run with: `cargo test --features ndarray,pretrained -- --ignored`

#![cfg(all(feature = "ndarray", feature = "pretrained"))]

use burn::backend::ndarray::NdArray;
use electra_burn::data::{HfTokenizer, InferenceBatcher, Padding, Tokenizer};
use electra_burn::evaluation::predict_probabilities;
use electra_burn::model::{download_hf_model, load_pretrained, ElectraConfig, EncoderFlavour};
use std::sync::Arc;

type B = NdArray<f32>;

const MODEL: &str = "google/electra-small-discriminator";

#[test]
#[ignore = "downloads weights from the Hugging Face Hub"]
fn electra_small_classifies_with_a_fresh_head() {
    let device = Default::default();
    let files = download_hf_model(MODEL, None).unwrap();

    let config = ElectraConfig::load_from_hf(&files.config_path, 4).unwrap();
    assert_eq!(config.flavour(), EncoderFlavour::Electra);
    assert_eq!(config.embedding_size, 128);
    assert_eq!(config.hidden_size, 256);

    let tokenizer = HfTokenizer::from_file(&files.tokenizer_path, config.pad_token_id, 64).unwrap();
    assert_eq!(tokenizer.vocab_size(), config.vocab_size);

    let mut model = config.init::<B>(&device);
    let summary = load_pretrained(&mut model, &files.weights_path).unwrap();
    assert!(summary.applied > 0);
    assert!(summary.missing_backbone().is_empty());
    // The discriminator ships no sequence classification head
    assert!(summary
        .missing
        .iter()
        .all(|path| path.starts_with("classifier.")));
    assert!(!summary.missing.is_empty());

    let batcher = InferenceBatcher::new(Arc::new(tokenizer), 64, Padding::MaxLength);
    let texts = vec![
        "Your order has shipped and arrives tomorrow".to_string(),
        "Flash sale: 50% off everything today only".to_string(),
    ];
    let probabilities = predict_probabilities(&model, &batcher, &texts, 2, &device).unwrap();

    assert_eq!(probabilities.len(), 2);
    for row in probabilities {
        assert_eq!(row.len(), 4);
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }
}
