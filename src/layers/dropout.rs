//! Dropout Layer
//!
//! Randomly zeros activations during training and scales the survivors by
//! `1 / keep_prob`, so evaluation can pass values through unchanged.
//! The recurrent layers wrap their per-step inputs and outputs in one of
//! these when a keep probability is configured.

use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

/// Inverted dropout parameterised by keep probability
#[derive(Clone, Copy, Debug)]
pub struct Dropout {
    pub keep_prob: f32,
}

impl Dropout {
    /// # Panics
    ///
    /// Panics unless `0 < keep_prob <= 1`; configs validate this first.
    pub fn new(keep_prob: f32) -> Self {
        assert!(
            keep_prob > 0.0 && keep_prob <= 1.0,
            "keep_prob must be in (0, 1]"
        );
        Self { keep_prob }
    }

    /// Forward pass with caching for backward
    ///
    /// With `rng == None` (evaluation) or `keep_prob == 1` the input is
    /// returned unchanged.
    pub fn forward(&self, x: &Tensor, rng: Option<&mut StdRng>) -> (Tensor, DropoutCache) {
        let rng = match rng {
            Some(rng) if self.keep_prob < 1.0 => rng,
            _ => {
                let cache = DropoutCache {
                    mask: None,
                    scale: 1.0,
                };
                return (x.clone(), cache);
            }
        };

        let scale = 1.0 / self.keep_prob;
        let mut mask = Vec::with_capacity(x.data.len());
        let mut output = x.zeros_like();

        for (out, &val) in output.data.iter_mut().zip(&x.data) {
            let keep = rng.random::<f32>() < self.keep_prob;
            mask.push(keep);
            if keep {
                *out = val * scale;
            }
        }

        (
            output,
            DropoutCache {
                mask: Some(mask),
                scale,
            },
        )
    }

    /// Backward pass: the same mask and scale applied to the gradient
    pub fn backward(&self, grad_output: &Tensor, cache: &DropoutCache) -> Tensor {
        match &cache.mask {
            Some(mask) => {
                let mut grad_input = grad_output.zeros_like();
                for (i, &keep) in mask.iter().enumerate() {
                    if keep {
                        grad_input.data[i] = grad_output.data[i] * cache.scale;
                    }
                }
                grad_input
            }
            None => grad_output.clone(),
        }
    }
}

/// Cache for dropout backward pass
pub struct DropoutCache {
    /// true = kept; None if dropout was not applied
    pub mask: Option<Vec<bool>>,
    pub scale: f32,
}
