use std::collections::BTreeSet;
use std::fmt;

/// Index of the largest probability of each row.
pub fn argmax_rows(probabilities: &[Vec<f32>]) -> Vec<usize> {
    probabilities
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (idx, &p)| {
                    if p > best.1 {
                        (idx, p)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// Unweighted mean of per-class F1 over every label seen in either input.
///
/// A class with no true and no predicted positives contributes 0.
pub fn macro_f1(y_true: &[usize], y_pred: &[usize]) -> f64 {
    let labels: BTreeSet<usize> = y_true.iter().chain(y_pred).copied().collect();
    if labels.is_empty() {
        return 0.0;
    }

    let total: f64 = labels
        .iter()
        .map(|&label| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (&t, &p) in y_true.iter().zip(y_pred) {
                match (t == label, p == label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let denominator = 2 * tp + fp + fn_;
            if denominator == 0 {
                0.0
            } else {
                2.0 * tp as f64 / denominator as f64
            }
        })
        .sum();

    total / labels.len() as f64
}

/// Mean negative log-likelihood of the true class, probabilities clipped away from 0 and 1.
pub fn log_loss(y_true: &[usize], probabilities: &[Vec<f32>]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let eps = f32::EPSILON as f64;

    let total: f64 = y_true
        .iter()
        .zip(probabilities)
        .map(|(&label, row)| {
            let row_sum: f64 = row.iter().map(|&p| p as f64).sum();
            let p = row.get(label).map(|&p| p as f64).unwrap_or(0.0);
            let p = if row_sum > 0.0 { p / row_sum } else { p };
            -p.clamp(eps, 1.0 - eps).ln()
        })
        .sum();

    total / y_true.len() as f64
}

/// Multiclass Matthews correlation coefficient from the confusion matrix.
pub fn matthews_corrcoef(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> f64 {
    let classes = y_true
        .iter()
        .chain(y_pred)
        .map(|&label| label + 1)
        .max()
        .unwrap_or(0)
        .max(num_classes);

    let mut t_sum = vec![0f64; classes];
    let mut p_sum = vec![0f64; classes];
    let mut correct = 0f64;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        t_sum[t] += 1.0;
        p_sum[p] += 1.0;
        if t == p {
            correct += 1.0;
        }
    }
    let n_samples = y_true.len() as f64;

    let cov_ytyp = correct * n_samples - t_sum.iter().zip(&p_sum).map(|(t, p)| t * p).sum::<f64>();
    let cov_ypyp = n_samples * n_samples - p_sum.iter().map(|p| p * p).sum::<f64>();
    let cov_ytyt = n_samples * n_samples - t_sum.iter().map(|t| t * t).sum::<f64>();

    if cov_ypyp * cov_ytyt == 0.0 {
        return 0.0;
    }
    cov_ytyp / (cov_ytyt * cov_ypyp).sqrt()
}

/// Area under the ROC curve of `scores` for the binary `positives`, ties averaged.
///
/// `None` when one of the two classes is absent.
fn binary_roc_auc(positives: &[bool], scores: &[f64]) -> Option<f64> {
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Average ranks (1-based) over tied scores.
    let mut ranks = vec![0f64; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }

    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(positives)
        .filter(|&(_, &p)| p)
        .map(|(r, _)| r)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;

    Some((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// ROC-AUC: the positive-class score for two classes, the macro one-vs-rest mean
/// otherwise. `None` when some class has no positive or no negative sample.
pub fn roc_auc_ovr(y_true: &[usize], probabilities: &[Vec<f32>], num_classes: usize) -> Option<f64> {
    let column = |class: usize| -> Vec<f64> {
        probabilities
            .iter()
            .map(|row| row.get(class).copied().unwrap_or(0.0) as f64)
            .collect()
    };
    let one_vs_rest = |class: usize| -> Option<f64> {
        let positives: Vec<bool> = y_true.iter().map(|&t| t == class).collect();
        binary_roc_auc(&positives, &column(class))
    };

    match num_classes {
        0 | 1 => None,
        2 => one_vs_rest(1),
        _ => {
            let scores: Option<Vec<f64>> = (0..num_classes).map(one_vs_rest).collect();
            scores.map(|scores| scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Scores of a classifier on one split.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub samples: usize,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub log_loss: f64,
    pub mcc: f64,
    pub roc_auc: Option<f64>,
}

impl ClassificationReport {
    pub fn compute(y_true: &[usize], probabilities: &[Vec<f32>], num_classes: usize) -> Self {
        let y_pred = argmax_rows(probabilities);

        Self {
            samples: y_true.len(),
            accuracy: accuracy(y_true, &y_pred),
            macro_f1: macro_f1(y_true, &y_pred),
            log_loss: log_loss(y_true, probabilities),
            mcc: matthews_corrcoef(y_true, &y_pred, num_classes),
            roc_auc: roc_auc_ovr(y_true, probabilities, num_classes),
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples:  {}", self.samples)?;
        writeln!(f, "Accuracy: {:.4}", self.accuracy)?;
        writeln!(f, "Macro F1: {:.4}", self.macro_f1)?;
        writeln!(f, "Log loss: {:.4}", self.log_loss)?;
        writeln!(f, "MCC:      {:.4}", self.mcc)?;
        match self.roc_auc {
            Some(auc) => write!(f, "ROC-AUC:  {auc:.4}"),
            None => write!(f, "ROC-AUC:  n/a"),
        }
    }
}
