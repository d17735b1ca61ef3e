//! Multi-head self-attention shared by the recurrent and transformer variants.

use candle_core::{Result, Tensor, D};
use candle_nn::{linear, Dropout, Linear, Module, ModuleT, VarBuilder};

/// Scaled dot-product attention over `[batch, heads, seq, head_dim]` inputs.
pub fn scaled_dot_product_attention(
    query: &Tensor,
    key: &Tensor,
    value: &Tensor,
    dropout: &Dropout,
    train: bool,
) -> Result<Tensor> {
    let d_k = query.dim(D::Minus1)? as f64;
    let scores = (query.matmul(&key.t()?)? * (1.0 / d_k.sqrt()))?;
    let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
    let weights = dropout.forward_t(&weights, train)?;
    weights.matmul(value)
}

pub struct MultiHeadAttention {
    query_proj: Linear,
    key_proj: Linear,
    value_proj: Linear,
    output_proj: Linear,
    n_heads: usize,
    head_dim: usize,
    dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn new(d_model: usize, n_heads: usize, dropout: f64, vb: VarBuilder) -> Result<Self> {
        if n_heads == 0 || d_model % n_heads != 0 {
            candle_core::bail!("d_model {} is not divisible by {} heads", d_model, n_heads);
        }

        Ok(Self {
            query_proj: linear(d_model, d_model, vb.pp("query"))?,
            key_proj: linear(d_model, d_model, vb.pp("key"))?,
            value_proj: linear(d_model, d_model, vb.pp("value"))?,
            output_proj: linear(d_model, d_model, vb.pp("output"))?,
            n_heads,
            head_dim: d_model / n_heads,
            dropout: Dropout::new(dropout as f32),
        })
    }

    /// `[batch, seq, d_model]` in and out.
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;

        let split_heads = |t: Tensor| -> Result<Tensor> {
            t.reshape((batch_size, seq_len, self.n_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };

        let q = split_heads(self.query_proj.forward(x)?)?;
        let k = split_heads(self.key_proj.forward(x)?)?;
        let v = split_heads(self.value_proj.forward(x)?)?;

        let context = scaled_dot_product_attention(&q, &k, &v, &self.dropout, train)?;
        let context = context
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.n_heads * self.head_dim))?;

        self.output_proj.forward(&context)
    }
}
