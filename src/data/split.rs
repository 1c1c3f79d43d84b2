use super::record::{DatasetSplits, EncodedRecord};
use crate::error::{PipelineError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

pub const DEFAULT_SEED: u64 = 42;
/// Share of the dataset held out from training.
pub const HOLDOUT_FRACTION: f64 = 0.2;
/// Share of the held-out part that becomes the test split.
pub const TEST_FRACTION_OF_HOLDOUT: f64 = 0.5;

/// Per-class counts drawn when sampling `draws` items without replacement.
///
/// Floors each class's proportional share, then hands the remaining draws to the
/// classes with the largest fractional parts, breaking ties at random.
fn approximate_mode(class_counts: &[usize], draws: usize, rng: &mut StdRng) -> Vec<usize> {
    let total: usize = class_counts.iter().sum();
    if total == 0 {
        return vec![0; class_counts.len()];
    }

    let continuous: Vec<f64> = class_counts
        .iter()
        .map(|&count| draws as f64 * count as f64 / total as f64)
        .collect();
    let mut floored: Vec<usize> = continuous.iter().map(|v| v.floor() as usize).collect();
    let mut need_to_add = draws.saturating_sub(floored.iter().sum());

    let remainders: Vec<f64> = continuous
        .iter()
        .zip(&floored)
        .map(|(v, &f)| v - f as f64)
        .collect();
    let mut values = remainders.clone();
    values.sort_by(|a, b| b.total_cmp(a));
    values.dedup();

    for value in values {
        if need_to_add == 0 {
            break;
        }
        let mut candidates: Vec<usize> = remainders
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == value)
            .map(|(idx, _)| idx)
            .collect();
        candidates.shuffle(rng);

        let add_now = need_to_add.min(candidates.len());
        for &idx in &candidates[..add_now] {
            floored[idx] += 1;
        }
        need_to_add -= add_now;
    }

    floored
}

/// Stratified shuffle split of `labels` into (train, test) index sets.
///
/// The test side receives `ceil(test_fraction * n)` items. Each class keeps its share
/// of the whole in both sides, up to rounding.
pub fn stratified_indices(
    labels: &[usize],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_samples = labels.len();
    let n_test = (test_fraction * n_samples as f64).ceil() as usize;
    if n_test == 0 || n_test >= n_samples {
        return Err(PipelineError::Split(format!(
            "test_size={test_fraction} with n_samples={n_samples} leaves an empty partition"
        )));
    }
    let n_train = n_samples - n_test;

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        members.entry(label).or_default().push(idx);
    }
    let class_counts: Vec<usize> = members.values().map(Vec::len).collect();
    let n_classes = class_counts.len();

    if class_counts.iter().any(|&count| count < 2) {
        return Err(PipelineError::Split(
            "The least populated class has only 1 member, which is too few. \
             Every class needs at least 2 members to stratify."
                .to_string(),
        ));
    }
    if n_train < n_classes {
        return Err(PipelineError::Split(format!(
            "The train size = {n_train} should be greater or equal to the number of classes = {n_classes}"
        )));
    }
    if n_test < n_classes {
        return Err(PipelineError::Split(format!(
            "The test size = {n_test} should be greater or equal to the number of classes = {n_classes}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let train_counts = approximate_mode(&class_counts, n_train, &mut rng);
    let remaining: Vec<usize> = class_counts
        .iter()
        .zip(&train_counts)
        .map(|(count, taken)| count - taken)
        .collect();
    let test_counts = approximate_mode(&remaining, n_test, &mut rng);

    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (class_idx, indices) in members.into_values().enumerate() {
        let mut indices = indices;
        indices.shuffle(&mut rng);

        let n_i = train_counts[class_idx];
        let t_i = test_counts[class_idx];
        train.extend_from_slice(&indices[..n_i]);
        test.extend_from_slice(&indices[n_i..n_i + t_i]);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    Ok((train, test))
}

/// Splits `items` in two, stratified by label, returning (train, test).
pub fn train_test_split(
    items: Vec<EncodedRecord>,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<EncodedRecord>, Vec<EncodedRecord>)> {
    let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
    let (train_idx, test_idx) = stratified_indices(&labels, test_fraction, seed)?;

    let mut slots: Vec<Option<EncodedRecord>> = items.into_iter().map(Some).collect();
    let mut take = |indices: Vec<usize>| -> Vec<EncodedRecord> {
        indices
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect()
    };
    let train = take(train_idx);
    let test = take(test_idx);

    Ok((train, test))
}

/// Partitions the dataset 80/10/10: 20% is carved off first, then halved into
/// validation and test.
pub fn stratified_split(records: Vec<EncodedRecord>, seed: u64) -> Result<DatasetSplits> {
    let (train, holdout) = train_test_split(records, HOLDOUT_FRACTION, seed)?;
    let (validation, test) = train_test_split(holdout, TEST_FRACTION_OF_HOLDOUT, seed)?;

    Ok(DatasetSplits {
        train,
        validation,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn dataset(class_sizes: &[usize]) -> Vec<EncodedRecord> {
        class_sizes
            .iter()
            .enumerate()
            .flat_map(|(label, &size)| {
                (0..size).map(move |i| EncodedRecord {
                    body: format!("class {label} message {i}"),
                    label,
                })
            })
            .collect()
    }

    fn count(items: &[EncodedRecord], label: usize) -> usize {
        items.iter().filter(|item| item.label == label).count()
    }

    #[test]
    fn approximate_mode_matches_draws() {
        let mut rng = StdRng::seed_from_u64(0);
        let counts = approximate_mode(&[50, 30, 20], 80, &mut rng);

        assert_eq!(counts, vec![40, 24, 16]);
    }

    #[test]
    fn approximate_mode_assigns_remainders() {
        let mut rng = StdRng::seed_from_u64(0);
        let counts = approximate_mode(&[3, 3, 3], 4, &mut rng);

        assert_eq!(counts.iter().sum::<usize>(), 4);
        assert!(counts.iter().all(|&c| c == 1 || c == 2));
    }

    #[test]
    fn partitions_are_disjoint_and_complete() {
        let splits = stratified_split(dataset(&[60, 30, 10]), DEFAULT_SEED).unwrap();

        assert_eq!(splits.sizes(), (80, 10, 10));

        let mut bodies = HashSet::new();
        for item in splits.train.iter().chain(&splits.validation).chain(&splits.test) {
            assert!(bodies.insert(item.body.clone()));
        }
        assert_eq!(bodies.len(), 100);
    }

    #[test]
    fn proportions_are_preserved() {
        let splits = stratified_split(dataset(&[60, 30, 10]), DEFAULT_SEED).unwrap();

        assert_eq!(count(&splits.train, 0), 48);
        assert_eq!(count(&splits.train, 1), 24);
        assert_eq!(count(&splits.train, 2), 8);
        assert_eq!(count(&splits.validation, 0), 6);
        assert_eq!(count(&splits.test, 2), 1);
    }

    #[test]
    fn same_seed_gives_same_partitions() {
        let first = stratified_split(dataset(&[37, 21, 9]), 7).unwrap();
        let second = stratified_split(dataset(&[37, 21, 9]), 7).unwrap();

        assert_eq!(first.train, second.train);
        assert_eq!(first.validation, second.validation);
        assert_eq!(first.test, second.test);
    }

    #[test]
    fn test_side_is_rounded_up() {
        let (train, test) = train_test_split(dataset(&[6, 5]), 0.2, DEFAULT_SEED).unwrap();

        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn singleton_class_is_rejected() {
        let err = stratified_split(dataset(&[20, 1]), DEFAULT_SEED).unwrap_err();

        assert!(matches!(err, PipelineError::Split(_)));
    }

    #[test]
    fn too_many_classes_for_the_test_side_is_rejected() {
        let err = train_test_split(dataset(&[2, 2, 2, 2, 2]), 0.2, DEFAULT_SEED).unwrap_err();

        assert!(matches!(err, PipelineError::Split(_)));
    }
}
