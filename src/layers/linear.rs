//! Linear Layer (Output Projection)
//!
//! Performs the affine transformation `y = x @ W + b`. The language model
//! uses one of these, shared across time steps, to turn the top recurrent
//! layer's outputs into vocabulary logits.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [rows, in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]
//! Output: y = x @ W + b [rows, out_features]
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_W = x^T @ grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = grad_y @ W^T
//! ```
//!
//! Weights use Glorot uniform initialisation, bias starts at zero.

use crate::error::{LmError, Result};
use crate::params::{Gradients, ParamGroup, ParamId, ParamStore};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};

/// Tensor of `shape` with values drawn uniformly from `[low, high)`
pub fn uniform_init(shape: Vec<usize>, low: f32, high: f32, rng: &mut StdRng) -> Result<Tensor> {
    let dist = Uniform::new(low, high)
        .map_err(|e| LmError::config(format!("invalid init range [{}, {}): {}", low, high, e)))?;
    let size: usize = shape.iter().product();
    let data = (0..size).map(|_| dist.sample(rng)).collect();
    Ok(Tensor::new(data, shape))
}

/// Glorot (Xavier) uniform initialisation for a `[fan_in, fan_out]` matrix
///
/// limit = √(6 / (fan_in + fan_out))
pub fn glorot_uniform(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Result<Tensor> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    uniform_init(vec![fan_in, fan_out], -limit, limit, rng)
}

/// Fully connected layer whose weights live in a [`ParamStore`]
pub struct Linear {
    pub weight: ParamId,
    pub bias: ParamId,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Register `{scope}/W` and `{scope}/b` in `store` under `group`
    pub fn new(
        store: &mut ParamStore,
        scope: &str,
        in_features: usize,
        out_features: usize,
        group: ParamGroup,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let weight = store.register(
            format!("{}/W", scope),
            group,
            glorot_uniform(in_features, out_features, rng)?,
        )?;
        let bias = store.register(
            format!("{}/b", scope),
            group,
            Tensor::zeros(vec![out_features]),
        )?;
        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Computes y = x @ W + b and caches x for the backward pass
    pub fn forward(&self, store: &ParamStore, x: &Tensor) -> (Tensor, LinearCache) {
        let y = x.matmul(store.get(self.weight)).add(store.get(self.bias));
        (y, LinearCache { x: x.clone() })
    }

    /// Accumulates weight and bias gradients, returns the input gradient
    pub fn backward(
        &self,
        store: &ParamStore,
        grads: &mut Gradients,
        grad_out: &Tensor,
        cache: &LinearCache,
    ) -> Tensor {
        grads.accumulate(self.weight, &cache.x.transpose().matmul(grad_out));
        grads.accumulate(self.bias, &grad_out.sum_rows());
        grad_out.matmul(&store.get(self.weight).transpose())
    }
}

/// Cache for linear layer backward pass
pub struct LinearCache {
    pub x: Tensor,
}
