//! Gradient Utilities
//!
//! Norm computation and clipping for the gradients produced by
//! [`LstmLanguageModel::backward`](crate::model::LstmLanguageModel::backward).
//!
//! ## Per-Tensor Clipping
//!
//! Recurrent networks occasionally produce a batch whose gradients explode.
//! The training step bounds each parameter's gradient on its own:
//!
//! ```text
//! for each parameter gradient g:
//!     norm = √(Σ g²)
//!     g = g * max_norm / max(norm, max_norm)
//! ```
//!
//! A tensor whose norm is already within `max_norm` is left untouched. Unlike
//! global-norm clipping, one exploding tensor does not shrink the updates of
//! the others.
//!
//! [`compute_grad_norm`] still reports the global norm across all tensors,
//! which is the number worth watching in logs.

use crate::params::Gradients;
use crate::tensor::Tensor;
use log::warn;
use rayon::prelude::*;

/// L2 norm over every gradient value of every parameter
///
/// √(Σ g²) across all tensors, computed before any clipping.
pub fn compute_grad_norm(grads: &Gradients) -> f32 {
    grads
        .iter()
        .map(|(_, g)| g.data.par_iter().map(|&v| v * v).sum::<f32>())
        .sum::<f32>()
        .sqrt()
}

/// Scale `grad` so its L2 norm is at most `max_norm`
///
/// Returns true if the tensor was rescaled.
pub fn clip_by_norm(grad: &mut Tensor, max_norm: f32) -> bool {
    let norm = grad.l2_norm();
    if !norm.is_finite() {
        warn!("non-finite gradient norm {}; leaving tensor unclipped", norm);
        return false;
    }
    if norm <= max_norm {
        return false;
    }
    let scale = max_norm / norm;
    grad.data.par_iter_mut().for_each(|v| *v *= scale);
    true
}

/// Clip every parameter's gradient independently
///
/// Returns how many tensors were rescaled.
pub fn clip_gradients_per_tensor(grads: &mut Gradients, max_norm: f32) -> usize {
    grads
        .iter_mut()
        .map(|(_, g)| clip_by_norm(g, max_norm))
        .filter(|&clipped| clipped)
        .count()
}
