//! Training Step
//!
//! One call to [`TrainOp::run`] performs a full optimisation step on a batch:
//!
//! ```text
//! logits = model.forward(batch, Train)
//! loss   = compute_loss(logits, labels)
//! grads  = model.backward(d loss / d logits)
//! summary.scalar("loss", global_step + 1, training_loss)
//! summary.scalar("cross_entropy", global_step + 1, mean cross-entropy)
//! clip each gradient tensor to L2 norm ≤ grad_norm
//! Adam update of every parameter
//! global_step += 1
//! ```
//!
//! The op keeps the optimizer moments and the global step between calls. The
//! learning rate is an argument of each step so that schedules live in the
//! driver.
//!
//! ## Example
//!
//! ```rust
//! use recurrent_lm::{
//!     training, LstmLanguageModel, MemorySummary, ModelConfig, ParamStore, TokenBatch,
//!     TrainConfig,
//! };
//!
//! let mut store = ParamStore::new();
//! let mut model = LstmLanguageModel::build(&ModelConfig::tiny(10), &mut store).unwrap();
//! let mut op = training(&store, &TrainConfig::tiny()).unwrap();
//! let mut summary = MemorySummary::default();
//!
//! let x = TokenBatch::from_rows(&[vec![1, 2, 3]]).unwrap();
//! let y = TokenBatch::from_rows(&[vec![2, 3, 4]]).unwrap();
//! let report = op.run(&mut model, &mut store, &x, &y, 1e-2, None, &mut summary).unwrap();
//! assert_eq!(report.global_step, 1);
//! assert_eq!(summary.values("loss").len(), 1);
//! ```

use crate::batch::TokenBatch;
use crate::config::{check_positive, TrainConfig};
use crate::error::{LmError, Result};
use crate::gradients::{clip_gradients_per_tensor, compute_grad_norm};
use crate::loss::{compute_loss, cross_entropy_grad};
use crate::model::{Forward, LstmLanguageModel, Mode};
use crate::optimizer::{adam_update, check_update_shapes, AdamOptimizer};
use crate::params::{Gradients, ParamStore};
use crate::summary::{ScalarSummary, CROSS_ENTROPY_TAG, LOSS_TAG};
use log::{debug, warn};

/// Outcome of one training step
#[derive(Clone, Debug, PartialEq)]
pub struct StepReport {
    /// Global step after the update
    pub global_step: usize,
    /// Summed cross-entropy over the batch
    pub total_loss: f32,
    /// Loss that was optimised (mean cross-entropy plus entropy term)
    pub training_loss: f32,
    /// Global gradient norm before clipping
    pub grad_norm: f32,
    /// Number of parameter tensors whose gradient was rescaled
    pub clipped_tensors: usize,
    pub loss_is_finite: bool,
}

/// Persistent state of the optimisation step
pub struct TrainOp {
    optimizer: AdamOptimizer,
    grad_norm: f32,
    entropy_reg: f32,
    global_step: usize,
}

/// Build the training op for every parameter registered in `store`
///
/// Validates the clipping threshold and Adam hyperparameters, then allocates
/// zeroed moment estimates.
pub fn training(store: &ParamStore, config: &TrainConfig) -> Result<TrainOp> {
    config.validate()?;
    if store.is_empty() {
        return Err(LmError::config("parameter store is empty; build the model first"));
    }
    let optimizer = AdamOptimizer::new(store, config);
    debug!(
        "training op: {} tensors, {} weights, grad_norm {}",
        store.len(),
        store.num_weights(),
        config.grad_norm
    );
    Ok(TrainOp {
        optimizer,
        grad_norm: config.grad_norm,
        entropy_reg: config.entropy_reg,
        global_step: 0,
    })
}

impl TrainOp {
    /// Number of updates applied so far
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn grad_norm(&self) -> f32 {
        self.grad_norm
    }

    pub fn optimizer(&self) -> &AdamOptimizer {
        &self.optimizer
    }

    /// Forward, loss, backward and update on one batch
    ///
    /// `entropy` is an optional caller-computed entropy value added to the
    /// training loss with weight `entropy_reg`. A non-finite loss still
    /// updates the parameters; it is flagged in the report and logged.
    ///
    /// Emits `loss` (the optimised loss) and `cross_entropy` (its
    /// unregularised mean) at the new global step. The update is validated
    /// before anything is emitted, and a failing summary sink returns `Err`
    /// with the parameters and global step unchanged.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        model: &mut LstmLanguageModel,
        store: &mut ParamStore,
        batch: &TokenBatch,
        labels: &TokenBatch,
        learning_rate: f32,
        entropy: Option<f32>,
        summary: &mut dyn ScalarSummary,
    ) -> Result<StepReport> {
        check_positive("learning_rate", learning_rate)?;

        let Forward { logits, cache } = model.forward(store, batch, Mode::Train)?;
        let loss = compute_loss(&logits, labels, entropy, self.entropy_reg)?;
        let grad_logits = cross_entropy_grad(&logits, labels)?;
        let mut grads = model.backward(store, &cache, &grad_logits)?;
        self.check_update(store, &grads, learning_rate)?;

        let step = self.global_step + 1;
        let loss_is_finite = loss.training_loss.is_finite();
        if !loss_is_finite {
            warn!("non-finite training loss {} at step {}", loss.training_loss, step);
        }

        summary.scalar(LOSS_TAG, step, loss.training_loss)?;
        let mean_cross_entropy = loss.total_loss / loss.num_positions() as f32;
        summary.scalar(CROSS_ENTROPY_TAG, step, mean_cross_entropy)?;

        let grad_norm = compute_grad_norm(&grads);
        let clipped_tensors = self.apply_gradients(store, &mut grads, learning_rate)?;

        Ok(StepReport {
            global_step: self.global_step,
            total_loss: loss.total_loss,
            training_loss: loss.training_loss,
            grad_norm,
            clipped_tensors,
            loss_is_finite,
        })
    }

    /// Clip `grads` per tensor and apply one Adam update
    ///
    /// Returns how many tensors were clipped. Nothing is modified, `grads`
    /// included, if the learning rate is invalid or any gradient tensor does
    /// not match its parameter's shape.
    pub fn apply_gradients(
        &mut self,
        store: &mut ParamStore,
        grads: &mut Gradients,
        learning_rate: f32,
    ) -> Result<usize> {
        self.check_update(store, grads, learning_rate)?;

        let clipped = clip_gradients_per_tensor(grads, self.grad_norm);
        adam_update(store, grads, &mut self.optimizer, learning_rate)?;
        self.global_step += 1;
        Ok(clipped)
    }

    fn check_update(&self, store: &ParamStore, grads: &Gradients, learning_rate: f32) -> Result<()> {
        check_positive("learning_rate", learning_rate)?;
        check_update_shapes(store, grads, &self.optimizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::params::ParamGroup;
    use crate::summary::MemorySummary;
    use crate::tensor::Tensor;

    fn setup() -> (ParamStore, LstmLanguageModel) {
        let mut store = ParamStore::new();
        let model = LstmLanguageModel::build(&ModelConfig::tiny(6), &mut store).unwrap();
        (store, model)
    }

    fn data() -> (TokenBatch, TokenBatch) {
        (
            TokenBatch::from_rows(&[vec![0, 1, 2, 3], vec![5, 4, 3, 2]]).unwrap(),
            TokenBatch::from_rows(&[vec![1, 2, 3, 4], vec![4, 3, 2, 1]]).unwrap(),
        )
    }

    #[test]
    fn test_invalid_hyperparameters() {
        let (store, _) = setup();
        let config = TrainConfig {
            grad_norm: 0.0,
            ..TrainConfig::default()
        };
        assert!(matches!(training(&store, &config), Err(LmError::Config(_))));
        assert!(training(&ParamStore::new(), &TrainConfig::default()).is_err());
    }

    #[test]
    fn test_run_emits_loss_and_advances_step() {
        let (mut store, mut model) = setup();
        let mut op = training(&store, &TrainConfig::tiny()).unwrap();
        let mut summary = MemorySummary::default();
        let (x, y) = data();

        for expected_step in 1..=3 {
            let report = op
                .run(&mut model, &mut store, &x, &y, 1e-2, None, &mut summary)
                .unwrap();
            assert_eq!(report.global_step, expected_step);
            assert!(report.loss_is_finite);
            assert!(report.grad_norm > 0.0);
        }
        assert_eq!(op.global_step(), 3);
        let steps: Vec<usize> = summary
            .records
            .iter()
            .filter(|r| r.tag == LOSS_TAG)
            .map(|r| r.step)
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);
        assert_eq!(summary.values(LOSS_TAG), summary.values(CROSS_ENTROPY_TAG));
    }

    #[test]
    fn test_non_finite_loss_is_reported_not_raised() {
        let (mut store, mut model) = setup();
        let config = TrainConfig {
            entropy_reg: 1.0,
            ..TrainConfig::default()
        };
        let mut op = training(&store, &config).unwrap();
        let mut summary = MemorySummary::default();
        let (x, y) = data();

        let report = op
            .run(&mut model, &mut store, &x, &y, 1e-2, Some(f32::INFINITY), &mut summary)
            .unwrap();
        assert!(!report.loss_is_finite);
        assert_eq!(report.training_loss, f32::INFINITY);
        assert!(report.total_loss.is_finite());
        assert_eq!(report.global_step, 1);
        assert_eq!(op.global_step(), 1);
        assert!(store.ids().all(|id| store.get(id).is_finite()));
        assert!(summary.values(CROSS_ENTROPY_TAG)[0].is_finite());
    }

    #[test]
    fn test_gradients_from_another_vocabulary_rejected() {
        let mut store = ParamStore::new();
        LstmLanguageModel::build(&ModelConfig::tiny(50), &mut store).unwrap();
        let mut other = ParamStore::new();
        LstmLanguageModel::build(&ModelConfig::tiny(6), &mut other).unwrap();
        assert_eq!(store.len(), other.len());

        let mut op = training(&store, &TrainConfig::default()).unwrap();
        let mut grads = Gradients::zeros_like(&other);
        for (_, g) in grads.iter_mut() {
            g.data.iter_mut().for_each(|v| *v = 100.0);
        }
        let grads_before = grads.clone();
        let pre = store.export_group(ParamGroup::Pretrainable);
        let post = store.export_group(ParamGroup::OutputOnly);

        let err = op.apply_gradients(&mut store, &mut grads, 1e-2).unwrap_err();
        assert!(matches!(err, LmError::ShapeMismatch { .. }));
        assert_eq!(op.global_step(), 0);
        assert_eq!(op.optimizer().step, 0);
        assert_eq!(store.export_group(ParamGroup::Pretrainable), pre);
        assert_eq!(store.export_group(ParamGroup::OutputOnly), post);
        assert!(grads.iter().zip(grads_before.iter()).all(|((_, a), (_, b))| a == b));
    }

    struct ClosedSink;

    impl ScalarSummary for ClosedSink {
        fn scalar(&mut self, _tag: &str, _step: usize, _value: f32) -> Result<()> {
            Err(LmError::Io(std::io::Error::other("summary sink closed")))
        }
    }

    #[test]
    fn test_failing_summary_leaves_step_untaken() {
        let (mut store, mut model) = setup();
        let mut op = training(&store, &TrainConfig::default()).unwrap();
        let before = store.export_group(ParamGroup::Pretrainable);
        let (x, y) = data();

        let result = op.run(&mut model, &mut store, &x, &y, 1e-2, None, &mut ClosedSink);
        assert!(matches!(result, Err(LmError::Io(_))));
        assert_eq!(op.global_step(), 0);
        assert_eq!(store.export_group(ParamGroup::Pretrainable), before);
    }

    #[test]
    fn test_bad_learning_rate_changes_nothing() {
        let (mut store, mut model) = setup();
        let before = store.export_group(ParamGroup::OutputOnly);
        let mut op = training(&store, &TrainConfig::default()).unwrap();
        let (x, y) = data();
        for lr in [0.0, -1.0, f32::NAN] {
            let result = op.run(&mut model, &mut store, &x, &y, lr, None, &mut MemorySummary::default());
            assert!(matches!(result, Err(LmError::Config(_))));
        }
        assert_eq!(op.global_step(), 0);
        assert_eq!(before, store.export_group(ParamGroup::OutputOnly));
    }

    #[test]
    fn test_apply_gradients_clips_each_tensor() {
        let (mut store, _) = setup();
        let config = TrainConfig {
            grad_norm: 0.5,
            ..TrainConfig::default()
        };
        let mut op = training(&store, &config).unwrap();
        let mut grads = Gradients::zeros_like(&store);
        let ids: Vec<_> = store.ids().collect();
        *grads.get_mut(ids[0]) = Tensor::new(
            vec![10.0; store.get(ids[0]).len()],
            store.get(ids[0]).shape.clone(),
        );

        let clipped = op.apply_gradients(&mut store, &mut grads, 1e-3).unwrap();
        assert_eq!(clipped, 1);
        assert!(grads.get(ids[0]).l2_norm() <= 0.5 + 1e-5);
        assert_eq!(op.global_step(), 1);
    }
}
