//! Live signal generation from the most recent bars.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SignalError};
use crate::ml::features::{extract_features, FeatureRow, NUM_FEATURES};
use crate::ml::model::Architecture;
use crate::ml::persistence::{CheckpointStore, FileStore, ModelKey, ModelRegistry};
use crate::risk::{RiskDecision, RiskPolicy};
use crate::types::{Bar, BarSeries, Signal, TimeFrame};

pub const DEFAULT_SEQUENCE_LENGTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub sell: f32,
    pub hold: f32,
    pub buy: f32,
}

impl ClassProbabilities {
    pub fn from_array(probs: [f32; 3]) -> Self {
        Self {
            sell: probs[Signal::Sell.index()],
            hold: probs[Signal::Hold.index()],
            buy: probs[Signal::Buy.index()],
        }
    }

    pub fn get(&self, signal: Signal) -> f32 {
        match signal {
            Signal::Sell => self.sell,
            Signal::Hold => self.hold,
            Signal::Buy => self.buy,
        }
    }

    /// Most likely class and its probability. Ties go to the lower index.
    pub fn argmax(&self) -> (Signal, f32) {
        Signal::ALL
            .iter()
            .fold((Signal::Sell, f32::NEG_INFINITY), |(best, p), s| {
                let q = self.get(*s);
                if q > p {
                    (*s, q)
                } else {
                    (best, p)
                }
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub instrument: String,
    pub timeframe: TimeFrame,
    pub architecture: Architecture,
    pub action: Signal,
    pub risk_adjusted_action: Signal,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
    pub risk: RiskDecision,
    /// Timestamp of the last bar in the window.
    pub as_of: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// One entry of [`SignalEngine::predict_batch`].
#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub bars: Vec<Bar>,
    pub instrument: String,
    pub timeframe: TimeFrame,
}

pub struct SignalEngine<S: CheckpointStore = FileStore> {
    registry: Arc<ModelRegistry<S>>,
    architecture: Architecture,
    sequence_length: usize,
    policy: RiskPolicy,
}

impl<S: CheckpointStore> SignalEngine<S> {
    pub fn new(registry: Arc<ModelRegistry<S>>) -> Self {
        Self {
            registry,
            architecture: Architecture::default(),
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            policy: RiskPolicy::default(),
        }
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_sequence_length(mut self, sequence_length: usize) -> Self {
        self.sequence_length = sequence_length;
        self
    }

    pub fn with_policy(mut self, policy: RiskPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry<S>> {
        &self.registry
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn predict(
        &self,
        bars: &[Bar],
        instrument: &str,
        timeframe: TimeFrame,
        risk_tolerance: u8,
    ) -> Result<Prediction> {
        RiskPolicy::check_tolerance(risk_tolerance)?;
        if self.sequence_length == 0 {
            return Err(SignalError::input("sequence length must be positive"));
        }
        let key = ModelKey::new(instrument, timeframe, self.architecture)?;

        let (series, _) = BarSeries::clean(bars);
        let rows = extract_features(series.bars());
        if rows.len() < self.sequence_length {
            return Err(SignalError::InsufficientData {
                required: self.sequence_length,
                available: rows.len(),
            });
        }

        let normalizer = self.registry.load_normalizer(&key.series())?;
        let loaded = self.registry.load_model(&key)?;
        if loaded.model.input_size != NUM_FEATURES || normalizer.num_features() != NUM_FEATURES {
            return Err(SignalError::input(format!(
                "feature mismatch for {}: extractor yields {}, model expects {}, normalizer expects {}",
                key,
                NUM_FEATURES,
                loaded.model.input_size,
                normalizer.num_features()
            )));
        }

        let recent = &rows[rows.len() - self.sequence_length..];
        let window = normalizer.transform_window(window_from_rows(recent).view())?;
        let probabilities = ClassProbabilities::from_array(loaded.model.predict_window(window.view())?);
        let (action, confidence) = probabilities.argmax();

        let risk = self.policy.evaluate(action, confidence as f64, risk_tolerance)?;
        let as_of = recent
            .last()
            .map(|r| r.timestamp)
            .ok_or_else(|| SignalError::input("empty feature window"))?;

        debug!(
            "{}: {} ({:.3}) -> {} at tolerance {}",
            key, action, confidence, risk.action, risk_tolerance
        );

        Ok(Prediction {
            instrument: key.instrument.clone(),
            timeframe,
            architecture: self.architecture,
            action,
            risk_adjusted_action: risk.action,
            confidence,
            probabilities,
            risk,
            as_of,
            timestamp: Utc::now(),
        })
    }

    /// One result per request, in request order.
    pub fn predict_batch(
        &self,
        requests: &[PredictionRequest],
        risk_tolerance: u8,
    ) -> Vec<Result<Prediction>> {
        let results: Vec<Result<Prediction>> = requests
            .par_iter()
            .map(|r| self.predict(&r.bars, &r.instrument, r.timeframe, risk_tolerance))
            .collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!("Batch prediction: {} requests, {} failed", requests.len(), failed);
        results
    }
}

fn window_from_rows(rows: &[FeatureRow]) -> Array2<f32> {
    Array2::from_shape_fn((rows.len(), NUM_FEATURES), |(t, f)| rows[t].values[f] as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_largest_probability() {
        let probs = ClassProbabilities::from_array([0.1, 0.2, 0.7]);
        assert_eq!(probs.argmax(), (Signal::Buy, 0.7));
        assert_eq!(probs.get(Signal::Sell), 0.1);

        let tie = ClassProbabilities::from_array([0.4, 0.4, 0.2]);
        assert_eq!(tie.argmax().0, Signal::Sell);
    }
}
