use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Loss applied to the classifier logits during training and validation.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum LossStrategy {
    #[default]
    CrossEntropy,
    /// Cross entropy with one weight per class.
    Weighted(Vec<f32>),
    /// Cross entropy with label smoothing `alpha`.
    LabelSmoothing(f32),
}

impl LossStrategy {
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let config = match self {
            LossStrategy::CrossEntropy => CrossEntropyLossConfig::new(),
            LossStrategy::Weighted(weights) => {
                CrossEntropyLossConfig::new().with_weights(Some(weights.clone()))
            }
            LossStrategy::LabelSmoothing(alpha) => {
                CrossEntropyLossConfig::new().with_smoothing(Some(*alpha))
            }
        };

        config.init(&logits.device()).forward(logits, targets)
    }
}

/// "Balanced" class weights: `n_samples / (n_classes * count_c)`.
///
/// Classes absent from `labels` get a weight of zero.
pub fn balanced_class_weights(labels: &[usize], num_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; num_classes];
    for &label in labels {
        if label < num_classes {
            counts[label] += 1;
        }
    }

    let n_samples = labels.len() as f64;
    counts
        .iter()
        .map(|&count| {
            if count == 0 {
                0.0
            } else {
                (n_samples / (num_classes as f64 * count as f64)) as f32
            }
        })
        .collect()
}
