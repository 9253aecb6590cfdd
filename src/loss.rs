//! Sparse Softmax Cross-Entropy Loss
//!
//! Scores per-position logits against gold token ids.
//!
//! ## Per-Position Loss
//!
//! ```text
//! ce = -log(softmax(logits)[gold])
//!    = logsumexp(logits) - logits[gold]
//! ```
//!
//! `logsumexp` subtracts the row maximum before exponentiating, so large
//! logits never overflow and the log is never taken of a rounded-to-zero
//! probability.
//!
//! ## Reductions
//!
//! - `total_loss`: sum over every position. Unnormalised, for
//!   perplexity-style reporting.
//! - `training_loss`: mean over every position, plus
//!   `entropy_reg * entropy` when the caller supplies an entropy value.
//!
//! ## Gradient
//!
//! ```text
//! d(mean ce)/d(logits) = (softmax(logits) - onehot(gold)) / (batch * time)
//! ```
//!
//! The entropy term is a caller-provided scalar and contributes no gradient
//! here.

use crate::batch::TokenBatch;
use crate::error::{LmError, Result};
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Result of [`compute_loss`]
#[derive(Clone, Debug)]
pub struct LossOutput {
    /// Sum of per-position cross-entropy
    pub total_loss: f32,
    /// Mean cross-entropy plus the weighted entropy term
    pub training_loss: f32,
    /// Cross-entropy at each position, `[batch, time]`
    pub per_position: Tensor,
}

impl LossOutput {
    pub fn num_positions(&self) -> usize {
        self.per_position.len()
    }

    /// `exp(total_loss / positions)`
    pub fn perplexity(&self) -> f32 {
        perplexity(self.total_loss, self.num_positions())
    }
}

/// Check that `logits` is `[B, T, V]` and `labels` is `[B, T]` with ids < V
fn check_shapes(logits: &Tensor, labels: &TokenBatch) -> Result<usize> {
    let (batch, time) = labels.shape();
    if logits.shape.len() != 3 || logits.shape[0] != batch || logits.shape[1] != time {
        return Err(LmError::ShapeMismatch {
            context: "loss: logits vs labels",
            expected: vec![batch, time, logits.shape.last().copied().unwrap_or(0)],
            actual: logits.shape.clone(),
        });
    }
    let vocab = logits.shape[2];
    labels.check_vocab(vocab)?;
    Ok(vocab)
}

/// Cross-entropy at every position, `[batch, time]`
pub fn sparse_softmax_cross_entropy(logits: &Tensor, labels: &TokenBatch) -> Result<Tensor> {
    let vocab = check_shapes(logits, labels)?;

    let losses: Vec<f32> = logits
        .data
        .par_chunks(vocab)
        .zip(labels.ids().par_iter())
        .map(|(row, &gold)| {
            let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let sum_exp: f32 = row.iter().map(|&x| (x - max).exp()).sum();
            max + sum_exp.ln() - row[gold]
        })
        .collect();

    let (batch, time) = labels.shape();
    Ok(Tensor::new(losses, vec![batch, time]))
}

/// Total and training loss
///
/// # Arguments
///
/// * `logits` - `[batch, time, vocab]`
/// * `labels` - gold ids, `[batch, time]`
/// * `entropy` - optional entropy value to regularise with
/// * `entropy_reg` - its weight; 0 leaves the training loss unchanged
pub fn compute_loss(
    logits: &Tensor,
    labels: &TokenBatch,
    entropy: Option<f32>,
    entropy_reg: f32,
) -> Result<LossOutput> {
    let per_position = sparse_softmax_cross_entropy(logits, labels)?;
    let total_loss: f32 = per_position.data.iter().sum();
    let mut training_loss = total_loss / per_position.len() as f32;
    if let Some(entropy) = entropy {
        if entropy_reg != 0.0 {
            training_loss += entropy_reg * entropy;
        }
    }
    Ok(LossOutput {
        total_loss,
        training_loss,
        per_position,
    })
}

/// Gradient of the mean cross-entropy with respect to the logits
pub fn cross_entropy_grad(logits: &Tensor, labels: &TokenBatch) -> Result<Tensor> {
    let vocab = check_shapes(logits, labels)?;
    let scale = 1.0 / labels.len() as f32;

    let mut grad = logits.reshape(&[labels.len(), vocab]).softmax_rows();
    grad.data
        .par_chunks_mut(vocab)
        .zip(labels.ids().par_iter())
        .for_each(|(row, &gold)| {
            row[gold] -= 1.0;
            for v in row.iter_mut() {
                *v *= scale;
            }
        });

    Ok(grad.reshape(&logits.shape))
}

/// Per-token perplexity from an unnormalised total loss
pub fn perplexity(total_loss: f32, num_tokens: usize) -> f32 {
    if num_tokens == 0 {
        return f32::NAN;
    }
    (total_loss / num_tokens as f32).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> TokenBatch {
        TokenBatch::from_rows(&[vec![0, 2], vec![1, 1]]).unwrap()
    }

    fn logits() -> Tensor {
        Tensor::new(
            vec![
                2.0, 0.5, -1.0, //
                0.0, 0.0, 0.0, //
                -3.0, 4.0, 1.0, //
                10.0, -10.0, 0.0,
            ],
            vec![2, 2, 3],
        )
    }

    fn naive_ce(row: &[f32], gold: usize) -> f32 {
        let sum: f32 = row.iter().map(|x| x.exp()).sum();
        -(row[gold].exp() / sum).ln()
    }

    #[test]
    fn test_matches_naive_formula() {
        let ce = sparse_softmax_cross_entropy(&logits(), &labels()).unwrap();
        let l = logits();
        for (pos, &gold) in labels().ids().iter().enumerate() {
            let expected = naive_ce(&l.data[pos * 3..pos * 3 + 3], gold);
            assert!((ce.data[pos] - expected).abs() < 1e-4);
        }
        assert!((ce.data[1] - 3.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_total_is_sum_and_training_is_mean() {
        let out = compute_loss(&logits(), &labels(), None, 0.0).unwrap();
        let sum: f32 = out.per_position.data.iter().sum();
        assert!((out.total_loss - sum).abs() < 1e-6);
        assert!((out.training_loss - sum / 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_entropy_term() {
        let base = compute_loss(&logits(), &labels(), None, 0.0).unwrap();
        let ignored = compute_loss(&logits(), &labels(), Some(123.0), 0.0).unwrap();
        assert_eq!(base.training_loss, ignored.training_loss);
        let mixed = compute_loss(&logits(), &labels(), Some(2.0), 0.1).unwrap();
        assert!((mixed.training_loss - (base.training_loss + 0.2)).abs() < 1e-6);
        assert_eq!(mixed.total_loss, base.total_loss);
    }

    #[test]
    fn test_non_negative_and_stable_for_extreme_logits() {
        let logits = Tensor::new(vec![1e4, -1e4, 0.0, -1e4, 1e4, 0.0], vec![1, 2, 3]);
        let labels = TokenBatch::from_rows(&[vec![0, 0]]).unwrap();
        let ce = sparse_softmax_cross_entropy(&logits, &labels).unwrap();
        assert!(ce.is_finite());
        assert!(ce.data.iter().all(|&v| v >= 0.0));
        assert!(ce.data[0] < 1e-6);
        assert!((ce.data[1] - 2e4).abs() < 1.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let labels = TokenBatch::from_rows(&[vec![0, 1, 2]]).unwrap();
        assert!(matches!(
            compute_loss(&logits(), &labels, None, 0.0),
            Err(LmError::ShapeMismatch { .. })
        ));
        let labels = TokenBatch::from_rows(&[vec![0, 3], vec![1, 1]]).unwrap();
        assert!(matches!(
            compute_loss(&logits(), &labels, None, 0.0),
            Err(LmError::TokenOutOfRange { id: 3, vocab_size: 3 })
        ));
    }

    #[test]
    fn test_gradient_rows_sum_to_zero_and_match_finite_difference() {
        let grad = cross_entropy_grad(&logits(), &labels()).unwrap();
        for row in grad.data.chunks(3) {
            assert!(row.iter().sum::<f32>().abs() < 1e-6);
        }

        let eps = 1e-2;
        for idx in [0, 4, 7] {
            let mut plus = logits();
            plus.data[idx] += eps;
            let mut minus = logits();
            minus.data[idx] -= eps;
            let lp = compute_loss(&plus, &labels(), None, 0.0).unwrap().training_loss;
            let lm = compute_loss(&minus, &labels(), None, 0.0).unwrap().training_loss;
            let numeric = (lp - lm) / (2.0 * eps);
            assert!((numeric - grad.data[idx]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_perplexity() {
        assert!((perplexity(4.0 * 3.0f32.ln(), 4) - 3.0).abs() < 1e-4);
    }
}
