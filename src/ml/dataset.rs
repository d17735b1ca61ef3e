use ndarray::{Array3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SignalError};
use crate::ml::features::NUM_FEATURES;
use crate::ml::labels::{ClassDistribution, LabeledSeries};
use crate::types::Signal;

/// Fixed-length windows of feature rows, shape `(N, L, F)`.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    pub features: Array3<f32>,
    pub labels: Vec<Signal>,
}

impl SequenceDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.features.dim().1
    }

    pub fn num_features(&self) -> usize {
        self.features.dim().2
    }

    pub fn distribution(&self) -> ClassDistribution {
        ClassDistribution::from_labels(&self.labels)
    }

    /// Samples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> SequenceDataset {
        SequenceDataset {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Slides a window of `seq_len` rows with stride 1. Sample `i` covers rows
/// `[i, i + seq_len)` and carries the label of its last row.
pub fn build_sequences(labeled: &LabeledSeries, seq_len: usize) -> Result<SequenceDataset> {
    let n_rows = labeled.rows.len();
    if seq_len == 0 {
        return Err(SignalError::input("sequence length must be positive"));
    }
    if n_rows <= seq_len {
        return Err(SignalError::input(format!(
            "need more than {} labeled rows to build sequences, got {}",
            seq_len, n_rows
        )));
    }

    let n = n_rows - seq_len;
    let mut features = Array3::<f32>::zeros((n, seq_len, NUM_FEATURES));
    for (i, mut sample) in features.axis_iter_mut(Axis(0)).enumerate() {
        for (t, mut step) in sample.axis_iter_mut(Axis(0)).enumerate() {
            let row = &labeled.rows[i + t];
            for (f, value) in step.iter_mut().enumerate() {
                *value = row.values[f] as f32;
            }
        }
    }
    let labels = (0..n).map(|i| labeled.labels[i + seq_len - 1]).collect();

    Ok(SequenceDataset { features, labels })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitRatios {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.70,
            validation: 0.15,
            test: 0.15,
        }
    }
}

impl SplitRatios {
    pub fn validate(&self) -> Result<()> {
        let parts = [self.train, self.validation, self.test];
        if parts.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(SignalError::input(format!(
                "split ratios must be positive, got {:?}",
                parts
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(SignalError::input(format!(
                "split ratios must sum to 1, got {}",
                sum
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DataSplits {
    pub train: SequenceDataset,
    pub validation: SequenceDataset,
    pub test: SequenceDataset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSizes {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

impl DataSplits {
    pub fn sizes(&self) -> SplitSizes {
        SplitSizes {
            train: self.train.len(),
            validation: self.validation.len(),
            test: self.test.len(),
        }
    }
}

/// Per-class train/validation/test partition. Deterministic for a given seed.
pub fn stratified_split(
    dataset: &SequenceDataset,
    ratios: SplitRatios,
    seed: u64,
) -> Result<DataSplits> {
    ratios.validate()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train_idx = Vec::new();
    let mut val_idx = Vec::new();
    let mut test_idx = Vec::new();

    for class in Signal::ALL {
        let mut indices: Vec<usize> = dataset
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(&mut rng);

        let n = indices.len();
        let n_train = ((n as f64 * ratios.train).round() as usize).min(n);
        let n_val = ((n as f64 * ratios.validation).round() as usize).min(n - n_train);

        train_idx.extend_from_slice(&indices[..n_train]);
        val_idx.extend_from_slice(&indices[n_train..n_train + n_val]);
        test_idx.extend_from_slice(&indices[n_train + n_val..]);
    }

    for (name, idx) in [
        ("train", &train_idx),
        ("validation", &val_idx),
        ("test", &test_idx),
    ] {
        if idx.is_empty() {
            return Err(SignalError::input(format!(
                "{} split is empty ({} samples total)",
                name,
                dataset.len()
            )));
        }
    }

    train_idx.shuffle(&mut rng);
    val_idx.shuffle(&mut rng);
    test_idx.shuffle(&mut rng);

    info!(
        "Split {} samples: train={} validation={} test={}",
        dataset.len(),
        train_idx.len(),
        val_idx.len(),
        test_idx.len()
    );

    Ok(DataSplits {
        train: dataset.select(&train_idx),
        validation: dataset.select(&val_idx),
        test: dataset.select(&test_idx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::FeatureRow;
    use crate::ml::labels::generate_labels;
    use chrono::{TimeZone, Utc};

    fn labeled(n: usize) -> LabeledSeries {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = (0..n)
            .map(|i| {
                let close = if i % 3 == 1 { 101.0 } else { 100.0 };
                let mut values = [0.0; NUM_FEATURES];
                values[0] = i as f64;
                FeatureRow { timestamp: ts, close, values }
            })
            .collect();
        generate_labels(rows, 0.002).unwrap()
    }

    #[test]
    fn test_sequence_alignment() {
        let series = labeled(31);
        let ds = build_sequences(&series, 5).unwrap();

        assert_eq!(ds.len(), series.rows.len() - 5);
        assert_eq!(ds.features.dim(), (25, 5, NUM_FEATURES));
        for i in 0..ds.len() {
            assert_eq!(ds.labels[i], series.labels[i + 4]);
            assert_eq!(ds.features[[i, 0, 0]], i as f32);
            assert_eq!(ds.features[[i, 4, 0]], (i + 4) as f32);
        }
    }

    #[test]
    fn test_sequence_length_errors() {
        let series = labeled(11);
        assert!(build_sequences(&series, 0).is_err());
        assert!(build_sequences(&series, 10).is_err());
        assert!(build_sequences(&series, 9).is_ok());
    }

    #[test]
    fn test_stratified_split_is_deterministic_and_partitions() {
        let ds = build_sequences(&labeled(200), 5).unwrap();
        let a = stratified_split(&ds, SplitRatios::default(), 42).unwrap();
        let b = stratified_split(&ds, SplitRatios::default(), 42).unwrap();

        assert_eq!(a.train.labels, b.train.labels);
        assert_eq!(a.train.features, b.train.features);

        let sizes = a.sizes();
        assert_eq!(sizes.train + sizes.validation + sizes.test, ds.len());

        // every class keeps roughly its share in train
        let full = ds.distribution();
        let train = a.train.distribution();
        for class in Signal::ALL {
            let expected = (full.count(class) as f64 * 0.7).round() as usize;
            assert_eq!(train.count(class), expected);
        }
    }

    #[test]
    fn test_split_rejects_bad_ratios() {
        let ds = build_sequences(&labeled(60), 5).unwrap();
        let bad = SplitRatios { train: 0.8, validation: 0.15, test: 0.15 };
        assert!(stratified_split(&ds, bad, 42).is_err());
        let zero = SplitRatios { train: 1.0, validation: 0.0, test: 0.0 };
        assert!(stratified_split(&ds, zero, 42).is_err());
    }

    #[test]
    fn test_split_rejects_too_few_samples() {
        let ds = build_sequences(&labeled(8), 5).unwrap();
        assert!(stratified_split(&ds, SplitRatios::default(), 42).is_err());
    }
}
