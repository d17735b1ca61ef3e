//! Sequence classifiers: `(batch, seq_len, features)` windows in, three
//! class logits (Sell, Hold, Buy) out.

pub mod attention;
pub mod recurrent;
pub mod transformer;
pub mod weights;

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{linear, Dropout, Linear, Module, ModuleT, VarBuilder, VarMap};
use ndarray::{Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SignalError};
use crate::types::Signal;

pub use recurrent::RecurrentAttentionModel;
pub use transformer::TransformerModel;
pub use weights::{export_weights, import_weights, NamedTensor, WeightsPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Lstm,
    Gru,
    Transformer,
}

impl Architecture {
    pub const ALL: [Architecture; 3] = [Architecture::Lstm, Architecture::Gru, Architecture::Transformer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Lstm => "lstm",
            Architecture::Gru => "gru",
            Architecture::Transformer => "transformer",
        }
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture::Lstm
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lstm" => Ok(Architecture::Lstm),
            "gru" => Ok(Architecture::Gru),
            "transformer" => Ok(Architecture::Transformer),
            _ => Err(SignalError::input(format!("unknown architecture: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 16,
            num_layers: 2,
            num_heads: 2,
            dropout: 0.1,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size < 2 {
            return Err(SignalError::input(format!(
                "hidden_size must be at least 2, got {}",
                self.hidden_size
            )));
        }
        if self.num_layers == 0 {
            return Err(SignalError::input("num_layers must be positive"));
        }
        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(SignalError::input(format!(
                "hidden_size {} must be divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(SignalError::input(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// `hidden -> hidden/2 -> ReLU -> dropout -> 3` on the last time step.
pub struct ClassifierHead {
    fc1: Linear,
    fc2: Linear,
    dropout: Dropout,
}

impl ClassifierHead {
    pub fn new(hidden_size: usize, dropout: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            fc1: linear(hidden_size, hidden_size / 2, vb.pp("fc1"))?,
            fc2: linear(hidden_size / 2, Signal::COUNT, vb.pp("fc2"))?,
            dropout: Dropout::new(dropout as f32),
        })
    }

    /// Takes the full `[batch, seq, hidden]` sequence and reads its last step.
    pub fn forward_t(&self, sequence: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let seq_len = sequence.dim(1)?;
        let last = sequence.narrow(1, seq_len - 1, 1)?.squeeze(1)?;
        let h = self.fc1.forward(&last)?.relu()?;
        let h = self.dropout.forward_t(&h, train)?;
        self.fc2.forward(&h)
    }
}

/// The closed set of model variants behind one forward contract.
pub enum SequenceClassifier {
    Recurrent(RecurrentAttentionModel),
    Transformer(TransformerModel),
}

impl ModuleT for SequenceClassifier {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        match self {
            SequenceClassifier::Recurrent(m) => m.forward_t(xs, train),
            SequenceClassifier::Transformer(m) => m.forward_t(xs, train),
        }
    }
}

/// A classifier plus the `VarMap` that owns its weights.
pub struct TrainableModel {
    pub varmap: VarMap,
    pub classifier: SequenceClassifier,
    pub architecture: Architecture,
    pub input_size: usize,
    pub config: ModelConfig,
    pub device: Device,
}

impl TrainableModel {
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.classifier.forward_t(xs, train)?)
    }

    /// Eval-mode class probabilities, one `[sell, hold, buy]` row per sample.
    pub fn predict_proba(&self, batch: &Array3<f32>) -> Result<Vec<[f32; 3]>> {
        let xs = array_to_tensor(batch, &self.device)?;
        let logits = self.forward_t(&xs, false)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;
        probs
            .into_iter()
            .map(|row| {
                <[f32; 3]>::try_from(row.as_slice()).map_err(|_| {
                    SignalError::NumericalInstability(format!(
                        "expected {} class probabilities, got {}",
                        Signal::COUNT,
                        row.len()
                    ))
                })
            })
            .collect()
    }

    /// Probabilities for a single `(L, F)` window.
    pub fn predict_window(&self, window: ArrayView2<f32>) -> Result<[f32; 3]> {
        let (l, f) = window.dim();
        let batch = window
            .to_owned()
            .into_shape_with_order((1, l, f))
            .map_err(|e| SignalError::input(format!("bad window shape: {}", e)))?;
        self.predict_proba(&batch)?
            .into_iter()
            .next()
            .ok_or_else(|| SignalError::NumericalInstability("empty model output".to_string()))
    }

    pub fn num_parameters(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }
}

pub fn array_to_tensor(batch: &Array3<f32>, device: &Device) -> Result<Tensor> {
    let (n, l, f) = batch.dim();
    let data: Vec<f32> = batch.iter().copied().collect();
    Ok(Tensor::from_vec(data, (n, l, f), device)?)
}

/// Builds a freshly initialized model of the requested variant.
pub fn build_model(
    architecture: Architecture,
    input_size: usize,
    config: &ModelConfig,
    device: &Device,
) -> Result<TrainableModel> {
    config.validate()?;
    if input_size == 0 {
        return Err(SignalError::input("input_size must be positive"));
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

    let classifier = match architecture {
        Architecture::Lstm | Architecture::Gru => SequenceClassifier::Recurrent(
            RecurrentAttentionModel::new(architecture, input_size, config, vb)?,
        ),
        Architecture::Transformer => {
            SequenceClassifier::Transformer(TransformerModel::new(input_size, config, vb)?)
        }
    };

    let model = TrainableModel {
        varmap,
        classifier,
        architecture,
        input_size,
        config: *config,
        device: device.clone(),
    };
    debug!(
        "Built {} model: input={} hidden={} layers={} params={}",
        architecture,
        input_size,
        config.hidden_size,
        config.num_layers,
        model.num_parameters()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_parse_and_display() {
        for arch in Architecture::ALL {
            assert_eq!(arch.as_str().parse::<Architecture>().unwrap(), arch);
        }
        assert_eq!("LSTM".parse::<Architecture>().unwrap(), Architecture::Lstm);
        assert!("cnn".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(ModelConfig::default().validate().is_ok());
        let bad_heads = ModelConfig { hidden_size: 10, num_heads: 3, ..Default::default() };
        assert!(bad_heads.validate().is_err());
        let bad_dropout = ModelConfig { dropout: 1.0, ..Default::default() };
        assert!(bad_dropout.validate().is_err());
        let no_layers = ModelConfig { num_layers: 0, ..Default::default() };
        assert!(no_layers.validate().is_err());
    }

    #[test]
    fn test_every_variant_emits_three_logits() -> Result<()> {
        let config = ModelConfig { hidden_size: 8, num_layers: 1, num_heads: 2, dropout: 0.1 };
        let batch = Array3::from_shape_fn((4, 6, 5), |(i, t, f)| ((i + t * f) as f32).sin());

        for arch in Architecture::ALL {
            let model = build_model(arch, 5, &config, &Device::Cpu)?;
            let xs = array_to_tensor(&batch, &Device::Cpu)?;
            let logits = model.forward_t(&xs, true)?;
            assert_eq!(logits.dims(), &[4, 3]);

            let probs = model.predict_proba(&batch)?;
            assert_eq!(probs.len(), 4);
            for row in probs {
                let sum: f32 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ModelConfig { hidden_size: 9, ..Default::default() };
        assert!(build_model(Architecture::Gru, 4, &config, &Device::Cpu).is_err());
    }
}
