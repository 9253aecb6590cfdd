//! Adam Optimizer
//!
//! Keeps one first-moment and one second-moment tensor per registered
//! parameter and applies the bias-corrected Adam update.
//!
//! ## Algorithm
//!
//! For each parameter θ with (already clipped) gradient g:
//!
//! ```text
//! m = β₁ * m + (1 - β₁) * g        # First moment (momentum)
//! v = β₂ * v + (1 - β₂) * g²       # Second moment (variance)
//! m_hat = m / (1 - β₁^t)           # Bias correction
//! v_hat = v / (1 - β₂^t)           # Bias correction
//! θ = θ - α * m_hat / (√v_hat + ε) # Parameter update
//! ```
//!
//! with β₁ = 0.9, β₂ = 0.999, ε = 1e-8 by default and t the number of
//! updates applied so far (starting at 1).
//!
//! The bias correction keeps early steps from being damped by the zero
//! initialisation of m and v.
//!
//! ## References
//!
//! - Kingma & Ba (2014): "Adam: A Method for Stochastic Optimization"
//!   https://arxiv.org/abs/1412.6980

use crate::config::TrainConfig;
use crate::error::{LmError, Result};
use crate::params::{Gradients, ParamStore};
use crate::tensor::Tensor;
use log::debug;
use rayon::prelude::*;

/// Adam optimizer state
///
/// `m` and `v` are indexed like the [`ParamStore`] they were created from.
pub struct AdamOptimizer {
    m: Vec<Tensor>,
    v: Vec<Tensor>,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Number of updates applied (for bias correction)
    pub step: usize,
}

impl AdamOptimizer {
    /// Zeroed moments for every parameter in `store`
    pub fn new(store: &ParamStore, config: &TrainConfig) -> Self {
        let m: Vec<Tensor> = store.ids().map(|id| store.get(id).zeros_like()).collect();
        let v = m.clone();
        debug!("Adam state allocated for {} tensors", m.len());
        Self {
            m,
            v,
            beta1: config.beta1,
            beta2: config.beta2,
            epsilon: config.epsilon,
            step: 0,
        }
    }

    /// First-moment estimate for parameter index `i`
    pub fn first_moment(&self, i: usize) -> &Tensor {
        &self.m[i]
    }

    /// Second-moment estimate for parameter index `i`
    pub fn second_moment(&self, i: usize) -> &Tensor {
        &self.v[i]
    }
}

/// Check that `grads` and the optimizer moments line up with `store`
///
/// Both the number of tensors and every tensor's shape must match.
pub fn check_update_shapes(
    store: &ParamStore,
    grads: &Gradients,
    optimizer: &AdamOptimizer,
) -> Result<()> {
    if grads.len() != store.len() || optimizer.m.len() != store.len() {
        return Err(LmError::ShapeMismatch {
            context: "adam_update: parameter count",
            expected: vec![store.len()],
            actual: vec![grads.len(), optimizer.m.len()],
        });
    }
    for id in store.ids() {
        let expected = &store.get(id).shape;
        let i = id.index();
        for (context, actual) in [
            ("adam_update: gradient shape", &grads.get(id).shape),
            ("adam_update: first moment shape", &optimizer.m[i].shape),
            ("adam_update: second moment shape", &optimizer.v[i].shape),
        ] {
            if actual != expected {
                return Err(LmError::ShapeMismatch {
                    context,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Apply one Adam update to every parameter in `store`
///
/// Fails without touching anything if the gradients or optimizer state
/// were built for a different store.
pub fn adam_update(
    store: &mut ParamStore,
    grads: &Gradients,
    optimizer: &mut AdamOptimizer,
    lr: f32,
) -> Result<()> {
    check_update_shapes(store, grads, optimizer)?;

    optimizer.step += 1;
    let step = optimizer.step as i32;
    let hp = AdamStep {
        lr,
        beta1: optimizer.beta1,
        beta2: optimizer.beta2,
        epsilon: optimizer.epsilon,
        bias_correction1: 1.0 - optimizer.beta1.powi(step),
        bias_correction2: 1.0 - optimizer.beta2.powi(step),
    };

    let ids: Vec<_> = store.ids().collect();
    for id in ids {
        let i = id.index();
        update_param(
            store.get_mut(id),
            grads.get(id),
            &mut optimizer.m[i],
            &mut optimizer.v[i],
            &hp,
        );
    }
    Ok(())
}

struct AdamStep {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    bias_correction1: f32,
    bias_correction2: f32,
}

impl AdamStep {
    #[inline(always)]
    fn apply(&self, param: &mut f32, grad: f32, m: &mut f32, v: &mut f32) {
        *m = self.beta1 * *m + (1.0 - self.beta1) * grad;
        *v = self.beta2 * *v + (1.0 - self.beta2) * grad * grad;
        let m_hat = *m / self.bias_correction1;
        let v_hat = *v / self.bias_correction2;
        *param -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
    }
}

/// Parallel for large tensors (>1000 elements), sequential for small ones
fn update_param(param: &mut Tensor, grad: &Tensor, m: &mut Tensor, v: &mut Tensor, hp: &AdamStep) {
    if param.data.len() > 1000 {
        param
            .data
            .par_iter_mut()
            .zip(grad.data.par_iter())
            .zip(m.data.par_iter_mut().zip(v.data.par_iter_mut()))
            .for_each(|((p, &g), (m, v))| hp.apply(p, g, m, v));
    } else {
        for (((p, &g), m), v) in param
            .data
            .iter_mut()
            .zip(&grad.data)
            .zip(m.data.iter_mut())
            .zip(v.data.iter_mut())
        {
            hp.apply(p, g, m, v);
        }
    }
}
