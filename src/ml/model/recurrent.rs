use candle_core::{Result, Tensor};
use candle_nn::rnn::{gru, lstm, GRUConfig, LSTMConfig, GRU, LSTM, RNN};
use candle_nn::{Dropout, ModuleT, VarBuilder};

use super::attention::MultiHeadAttention;
use super::{Architecture, ClassifierHead, ModelConfig};

enum RecurrentLayer {
    Lstm(LSTM),
    Gru(GRU),
}

impl RecurrentLayer {
    /// Full output sequence `[batch, seq, hidden]`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            RecurrentLayer::Lstm(cell) => {
                let states = cell.seq(xs)?;
                cell.states_to_tensor(&states)
            }
            // GRU::states_to_tensor concatenates along the hidden axis, so stack by hand
            RecurrentLayer::Gru(cell) => {
                let states = cell.seq(xs)?;
                let hs: Vec<Tensor> = states.iter().map(|s| s.h().clone()).collect();
                Tensor::stack(&hs, 1)
            }
        }
    }
}

/// Stacked LSTM or GRU, self-attention over its outputs, then the shared head.
pub struct RecurrentAttentionModel {
    layers: Vec<RecurrentLayer>,
    layer_dropout: Dropout,
    attention: MultiHeadAttention,
    head: ClassifierHead,
}

impl RecurrentAttentionModel {
    pub fn new(
        architecture: Architecture,
        input_size: usize,
        config: &ModelConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden = config.hidden_size;
        let mut layers = Vec::with_capacity(config.num_layers);

        for i in 0..config.num_layers {
            let in_dim = if i == 0 { input_size } else { hidden };
            let layer_vb = vb.pp(format!("rnn{}", i));
            let layer = match architecture {
                Architecture::Lstm => {
                    RecurrentLayer::Lstm(lstm(in_dim, hidden, LSTMConfig::default(), layer_vb)?)
                }
                Architecture::Gru => {
                    RecurrentLayer::Gru(gru(in_dim, hidden, GRUConfig::default(), layer_vb)?)
                }
                Architecture::Transformer => {
                    candle_core::bail!("transformer is not a recurrent architecture")
                }
            };
            layers.push(layer);
        }

        Ok(Self {
            layers,
            layer_dropout: Dropout::new(config.dropout as f32),
            attention: MultiHeadAttention::new(hidden, config.num_heads, config.dropout, vb.pp("attention"))?,
            head: ClassifierHead::new(hidden, config.dropout, vb.pp("head"))?,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden = xs.clone();
        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            hidden = layer.forward(&hidden)?;
            // dropout between stacked layers only
            if i < last {
                hidden = self.layer_dropout.forward_t(&hidden, train)?;
            }
        }

        let attended = self.attention.forward_t(&hidden, train)?;
        self.head.forward_t(&attended, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config() -> ModelConfig {
        ModelConfig {
            hidden_size: 8,
            num_layers: 2,
            num_heads: 2,
            dropout: 0.1,
        }
    }

    #[test]
    fn test_lstm_forward_shape() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = RecurrentAttentionModel::new(Architecture::Lstm, 5, &config(), vb)?;

        let x = Tensor::randn(0f32, 1f32, (3, 10, 5), &Device::Cpu)?;
        assert_eq!(model.forward_t(&x, false)?.dims(), &[3, 3]);
        Ok(())
    }

    #[test]
    fn test_gru_layer_keeps_sequence_axis() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = RecurrentLayer::Gru(gru(5, 8, GRUConfig::default(), vb.pp("rnn0"))?);

        let x = Tensor::randn(0f32, 1f32, (4, 6, 5), &Device::Cpu)?;
        assert_eq!(layer.forward(&x)?.dims(), &[4, 6, 8]);

        let model = RecurrentAttentionModel::new(Architecture::Gru, 5, &config(), vb.pp("model"))?;
        assert_eq!(model.forward_t(&x, true)?.dims(), &[4, 3]);
        Ok(())
    }

    #[test]
    fn test_gru_and_lstm_have_distinct_parameters() -> Result<()> {
        let lstm_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&lstm_map, DType::F32, &Device::Cpu);
        RecurrentAttentionModel::new(Architecture::Lstm, 5, &config(), vb)?;

        let gru_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&gru_map, DType::F32, &Device::Cpu);
        RecurrentAttentionModel::new(Architecture::Gru, 5, &config(), vb)?;

        let count = |m: &VarMap| -> usize { m.all_vars().iter().map(|v| v.elem_count()).sum() };
        // LSTM has four gates, GRU three
        assert!(count(&lstm_map) > count(&gru_map));
        Ok(())
    }

    #[test]
    fn test_transformer_is_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(RecurrentAttentionModel::new(Architecture::Transformer, 5, &config(), vb).is_err());
    }
}
