use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};

/// Per-feature standardization fitted on the train split only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub mean: Vec<f32>,
    /// Population std; a constant feature gets scale 1.
    pub scale: Vec<f32>,
    pub samples_seen: usize,
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

impl Normalizer {
    /// Fits on `(N, L, F)` data flattened to `(N*L, F)`.
    pub fn fit(train: &Array3<f32>) -> Result<Self> {
        let (n, l, f) = train.dim();
        if n * l == 0 || f == 0 {
            return Err(SignalError::input("cannot fit normalizer on empty data"));
        }

        let flat = train.mapv(finite_or_zero).into_shape_with_order((n * l, f)).map_err(|e| {
            SignalError::input(format!("cannot flatten training features: {}", e))
        })?;

        let count = (n * l) as f64;
        let mut mean = Vec::with_capacity(f);
        let mut scale = Vec::with_capacity(f);
        for column in flat.axis_iter(Axis(1)) {
            let m = column.iter().map(|v| *v as f64).sum::<f64>() / count;
            let var = column.iter().map(|v| (*v as f64 - m).powi(2)).sum::<f64>() / count;
            let std = var.sqrt();
            mean.push(m as f32);
            scale.push(if std > 0.0 && std.is_finite() { std as f32 } else { 1.0 });
        }

        Ok(Self {
            mean,
            scale,
            samples_seen: n * l,
        })
    }

    pub fn num_features(&self) -> usize {
        self.mean.len()
    }

    fn check_features(&self, f: usize) -> Result<()> {
        if f != self.num_features() {
            return Err(SignalError::input(format!(
                "normalizer fitted on {} features, got {}",
                self.num_features(),
                f
            )));
        }
        Ok(())
    }

    pub fn transform(&self, data: &Array3<f32>) -> Result<Array3<f32>> {
        self.check_features(data.dim().2)?;
        let mut out = data.mapv(finite_or_zero);
        for mut row in out.lanes_mut(Axis(2)) {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
        Ok(out)
    }

    /// Transforms a single live `(L, F)` window.
    pub fn transform_window(&self, window: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_features(window.dim().1)?;
        let mut out = window.mapv(finite_or_zero);
        for mut row in out.axis_iter_mut(Axis(0)) {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sample() -> Array3<f32> {
        Array3::from_shape_fn((4, 3, 2), |(i, t, f)| {
            if f == 0 {
                (i * 3 + t) as f32
            } else {
                7.0
            }
        })
    }

    #[test]
    fn test_fit_constant_column_has_unit_scale() {
        let norm = Normalizer::fit(&sample()).unwrap();
        assert_eq!(norm.mean[1], 7.0);
        assert_eq!(norm.scale[1], 1.0);
        assert!((norm.mean[0] - 5.5).abs() < 1e-6);
    }

    #[test]
    fn test_transform_standardizes_and_is_stable() {
        let data = sample();
        let norm = Normalizer::fit(&data).unwrap();
        let before = norm.clone();

        let a = norm.transform(&data).unwrap();
        let b = norm.transform(&data).unwrap();
        assert_eq!(a, b);
        assert_eq!(norm, before);

        let col: Vec<f32> = a.index_axis(Axis(2), 0).iter().copied().collect();
        let mean = col.iter().sum::<f32>() / col.len() as f32;
        let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / col.len() as f32;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-4);
        assert!(a.index_axis(Axis(2), 1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_non_finite_inputs_are_clamped() {
        let mut data = sample();
        data[[0, 0, 0]] = f32::NAN;
        let norm = Normalizer::fit(&data).unwrap();
        assert!(norm.mean.iter().all(|m| m.is_finite()));

        data[[1, 1, 1]] = f32::INFINITY;
        let out = norm.transform(&data).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_window_matches_batch_transform() {
        let data = sample();
        let norm = Normalizer::fit(&data).unwrap();
        let batch = norm.transform(&data).unwrap();
        let window = norm.transform_window(data.index_axis(Axis(0), 2)).unwrap();
        assert_eq!(window, batch.index_axis(Axis(0), 2));
    }

    #[test]
    fn test_feature_count_mismatch() {
        let norm = Normalizer::fit(&sample()).unwrap();
        let wrong = Array3::<f32>::zeros((1, 3, 5));
        assert!(norm.transform(&wrong).is_err());
    }
}
