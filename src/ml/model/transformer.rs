use candle_core::{Device, Result, Tensor, D};
use candle_nn::{linear, Dropout, Init, Linear, Module, ModuleT, VarBuilder};

use super::attention::MultiHeadAttention;
use super::{ClassifierHead, ModelConfig};

/// Width of the feed-forward block relative to the model dimension.
pub const FF_MULTIPLIER: usize = 4;

/// Sinusoidal table `[seq_len, d_model]`; even columns sin, odd columns cos.
pub fn positional_encoding(seq_len: usize, d_model: usize, device: &Device) -> Result<Tensor> {
    let mut table = vec![0f32; seq_len * d_model];
    for pos in 0..seq_len {
        for i in 0..d_model {
            let pair = (i / 2 * 2) as f64;
            let angle = pos as f64 * (-(10_000f64.ln()) * pair / d_model as f64).exp();
            let value = if i % 2 == 0 { angle.sin() } else { angle.cos() };
            table[pos * d_model + i] = value as f32;
        }
    }
    Tensor::from_vec(table, (seq_len, d_model), device)
}

/// Layer normalization over the last dimension, built from plain tensor ops.
/// candle 0.8's fused `layer_norm` has no backward pass for its input, so
/// gradients would stop at every norm.
struct Norm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl Norm {
    fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(size, "bias", Init::Const(0.0))?,
            eps,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

/// Post-norm encoder block: attention, add & norm, feed-forward, add & norm.
struct EncoderBlock {
    attention: MultiHeadAttention,
    norm1: Norm,
    ff1: Linear,
    ff2: Linear,
    norm2: Norm,
    dropout: Dropout,
}

impl EncoderBlock {
    fn new(d_model: usize, n_heads: usize, dropout: f64, vb: VarBuilder) -> Result<Self> {
        let ff_dim = d_model * FF_MULTIPLIER;
        Ok(Self {
            attention: MultiHeadAttention::new(d_model, n_heads, dropout, vb.pp("attention"))?,
            norm1: Norm::new(d_model, 1e-5, vb.pp("norm1"))?,
            ff1: linear(d_model, ff_dim, vb.pp("ff1"))?,
            ff2: linear(ff_dim, d_model, vb.pp("ff2"))?,
            norm2: Norm::new(d_model, 1e-5, vb.pp("norm2"))?,
            dropout: Dropout::new(dropout as f32),
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let attn = self.attention.forward_t(xs, train)?;
        let xs = self.norm1.forward(&(xs + self.dropout.forward_t(&attn, train)?)?)?;

        let ff = self.ff1.forward(&xs)?.relu()?;
        let ff = self.ff2.forward(&self.dropout.forward_t(&ff, train)?)?;
        self.norm2.forward(&(xs + self.dropout.forward_t(&ff, train)?)?)
    }
}

pub struct TransformerModel {
    input_projection: Linear,
    blocks: Vec<EncoderBlock>,
    dropout: Dropout,
    head: ClassifierHead,
    d_model: usize,
}

impl TransformerModel {
    pub fn new(input_size: usize, config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let d_model = config.hidden_size;
        let blocks = (0..config.num_layers)
            .map(|i| EncoderBlock::new(d_model, config.num_heads, config.dropout, vb.pp(format!("block{}", i))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            input_projection: linear(input_size, d_model, vb.pp("input_projection"))?,
            blocks,
            dropout: Dropout::new(config.dropout as f32),
            head: ClassifierHead::new(d_model, config.dropout, vb.pp("head"))?,
            d_model,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let seq_len = xs.dim(1)?;
        let projected = self.input_projection.forward(xs)?;
        let pe = positional_encoding(seq_len, self.d_model, xs.device())?;
        let mut hidden = self.dropout.forward_t(&projected.broadcast_add(&pe)?, train)?;

        for block in &self.blocks {
            hidden = block.forward_t(&hidden, train)?;
        }
        self.head.forward_t(&hidden, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_positional_encoding_values() -> Result<()> {
        let pe = positional_encoding(4, 6, &Device::Cpu)?.to_vec2::<f32>()?;
        // position 0: sin(0) = 0, cos(0) = 1
        assert_eq!(pe[0], vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        assert!((pe[1][0] - 1f32.sin()).abs() < 1e-6);
        assert!((pe[1][1] - 1f32.cos()).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_transformer_forward_shape() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ModelConfig {
            hidden_size: 8,
            num_layers: 2,
            num_heads: 4,
            dropout: 0.1,
        };
        let model = TransformerModel::new(5, &config, vb)?;

        let x = Tensor::randn(0f32, 1f32, (2, 12, 5), &Device::Cpu)?;
        assert_eq!(model.forward_t(&x, true)?.dims(), &[2, 3]);
        assert_eq!(model.forward_t(&x, false)?.dims(), &[2, 3]);
        Ok(())
    }

    #[test]
    fn test_norm_output_is_standardized() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = Norm::new(4, 1e-5, vb)?;

        let x = Tensor::new(&[[1f32, 2., 3., 4.], [10., 10., 10., 10.]], &Device::Cpu)?;
        let out = norm.forward(&x)?.to_vec2::<f32>()?;
        let mean: f32 = out[0].iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!(out[1].iter().all(|v| v.abs() < 1e-3));
        Ok(())
    }

    #[test]
    fn test_norm_passes_gradient_to_input() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = Norm::new(4, 1e-5, vb)?;

        let x = candle_core::Var::new(&[[1f32, 2., 3., 5.]], &Device::Cpu)?;
        let weights = Tensor::new(&[[1f32, -2., 3., 0.5]], &Device::Cpu)?;
        let loss = norm.forward(x.as_tensor())?.mul(&weights)?.sum_all()?;
        let grads = loss.backward()?;

        let grad = grads.get(x.as_tensor()).expect("input gradient").to_vec2::<f32>()?;
        assert!(grad[0].iter().all(|g| g.is_finite()));
        assert!(grad[0].iter().any(|g| g.abs() > 1e-4));
        Ok(())
    }
}
