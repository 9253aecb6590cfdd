//! Recurrent LM: LSTM Language Model Training
//!
//! A word-level recurrent language model implemented from scratch in Rust:
//! embedding lookup, one or two LSTM layers with a learned initial state,
//! a linear projection to vocabulary logits, sparse softmax cross-entropy,
//! and an Adam training step with per-tensor gradient clipping.
//!
//! # Modules
//!
//! - [`tensor`] - Dense CPU tensors with rayon-parallel kernels
//! - [`params`] - Parameter registry, groups and gradient buffers
//! - [`layers`] - Embedding, LSTM, dropout and linear layers
//! - [`model`] - The language model and the [`inference`] builder
//! - [`loss`] - Cross-entropy, its gradient and perplexity
//! - [`gradients`] - Gradient norms and per-tensor clipping
//! - [`optimizer`] - Adam
//! - [`train`] - The [`training`] op that ties a step together
//! - [`summary`] - Scalar metric sinks
//! - [`config`] - Serde model and training configurations
//!
//! # Example
//!
//! ```rust
//! use recurrent_lm::{
//!     inference, training, Mode, ModelConfig, NullSummary, ParamStore, TokenBatch,
//!     TrainConfig,
//! };
//!
//! let config = ModelConfig::tiny(8);
//! let mut store = ParamStore::new();
//! let x = TokenBatch::from_rows(&[vec![1, 2, 3], vec![3, 2, 1]]).unwrap();
//! let y = TokenBatch::from_rows(&[vec![2, 3, 4], vec![2, 1, 0]]).unwrap();
//!
//! let mut out = inference(&x, &config, &mut store, Mode::Eval).unwrap();
//! assert_eq!(out.logits.shape, vec![2, 3, 8]);
//!
//! let mut op = training(&store, &TrainConfig::tiny()).unwrap();
//! let report = op
//!     .run(&mut out.model, &mut store, &x, &y, 1e-2, None, &mut NullSummary)
//!     .unwrap();
//! assert!(report.loss_is_finite);
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod gradients;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod params;
pub mod summary;
pub mod tensor;
pub mod train;

// Re-export main types for convenience
pub use batch::TokenBatch;
pub use config::{ModelConfig, TrainConfig};
pub use error::{LmError, Result};
pub use loss::{compute_loss, cross_entropy_grad, perplexity, LossOutput};
pub use model::{inference, Forward, ForwardCache, Inference, LstmLanguageModel, Mode};
pub use params::{Gradients, ParamGroup, ParamId, ParamStore};
pub use summary::{
    CsvSummaryWriter, MemorySummary, NullSummary, ScalarSummary, CROSS_ENTROPY_TAG, LOSS_TAG,
};
pub use tensor::Tensor;
pub use train::{training, StepReport, TrainOp};
