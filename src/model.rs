//! LSTM Language Model
//!
//! Maps a batch of token ids to per-position vocabulary logits.
//!
//! ## Architecture Overview
//!
//! ```text
//! Input tokens [batch, time]
//!     ↓
//! Embedding lookup [batch, time, embedding_dim]
//!     ↓
//! LSTM layer 1 (learned initial state) [batch, time, lstm_hidden_dim_1]
//!     ↓
//! LSTM layer 2 (only if lstm_hidden_dim_2 is set)
//!     ↓
//! Linear, shared across time → logits [batch, time, vocab_size]
//! ```
//!
//! The projection reads the top recurrent layer's output sequence.
//!
//! ## Parameter Partitions
//!
//! Building the model registers every tensor in a [`ParamStore`] and
//! records two ordered handle lists:
//!
//! - `pretrainable_params`: embedding table, then for each LSTM layer its
//!   initial-state vector, kernel and bias
//! - `output_only_params`: `[W, b]` of the projection
//!
//! ## Example
//!
//! ```rust
//! use recurrent_lm::{inference, Mode, ModelConfig, ParamStore, TokenBatch};
//!
//! let config = ModelConfig::tiny(20);
//! let mut store = ParamStore::new();
//! let input = TokenBatch::from_rows(&[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
//! let out = inference(&input, &config, &mut store, Mode::Eval).unwrap();
//! assert_eq!(out.logits.shape, vec![2, 3, 20]);
//! assert_eq!(out.output_only_params.len(), 2);
//! ```

use crate::batch::TokenBatch;
use crate::config::ModelConfig;
use crate::error::{LmError, Result};
use crate::layers::{Embedding, Linear, LinearCache, Lstm, LstmCache};
use crate::params::{Gradients, ParamGroup, ParamId, ParamStore};
use crate::tensor::Tensor;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Whether a forward pass applies dropout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

pub struct LstmLanguageModel {
    config: ModelConfig,
    embedding: Embedding,
    layers: Vec<Lstm>,
    projection: Linear,
    pretrainable: Vec<ParamId>,
    output_only: Vec<ParamId>,
    dropout_rng: StdRng,
}

impl LstmLanguageModel {
    /// Validate `config` and register all parameters in `store`
    ///
    /// Nothing is allocated if the config is invalid. A store holds one
    /// model: building into a store that already has parameters with the
    /// same names is a configuration error.
    pub fn build(config: &ModelConfig, store: &mut ParamStore) -> Result<Self> {
        config.validate()?;
        if !store.is_empty() {
            return Err(LmError::config(format!(
                "parameter store already holds {} tensors",
                store.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);

        let embedding = Embedding::new(
            store,
            "embedding",
            config.vocab_size,
            config.embedding_dim,
            &mut rng,
        )?;

        let mut layers = vec![Lstm::new(
            store,
            "recurrent_layer1",
            config.embedding_dim,
            config.lstm_hidden_dim_1,
            config.keep_prob,
            &mut rng,
        )?];
        if let Some(hidden_2) = config.lstm_hidden_dim_2 {
            layers.push(Lstm::new(
                store,
                "recurrent_layer2",
                config.lstm_hidden_dim_1,
                hidden_2,
                config.keep_prob,
                &mut rng,
            )?);
        }

        let projection = Linear::new(
            store,
            "output_linear",
            config.top_hidden_dim(),
            config.vocab_size,
            ParamGroup::OutputOnly,
            &mut rng,
        )?;

        let mut pretrainable = vec![embedding.table];
        for layer in &layers {
            pretrainable.extend(layer.params());
        }
        let output_only = vec![projection.weight, projection.bias];

        debug!(
            "built LSTM LM: {} layers, {} pretrainable tensors, {} output tensors, {} weights",
            layers.len(),
            pretrainable.len(),
            output_only.len(),
            store.num_weights()
        );

        Ok(Self {
            config: config.clone(),
            embedding,
            layers,
            projection,
            pretrainable,
            output_only,
            dropout_rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Embedding table followed by recurrent-layer tensors
    pub fn pretrainable_params(&self) -> &[ParamId] {
        &self.pretrainable
    }

    /// `[projection_matrix, projection_bias]`
    pub fn output_only_params(&self) -> &[ParamId] {
        &self.output_only
    }

    /// Number of stacked LSTM layers (1 or 2)
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Compute logits `[batch, time, vocab_size]`
    ///
    /// Dropout masks are drawn from the model's own seeded generator, so a
    /// model built from the same config replays the same masks.
    pub fn forward(&mut self, store: &ParamStore, input: &TokenBatch, mode: Mode) -> Result<Forward> {
        let (batch, time) = input.shape();

        let mut x = self.embedding.forward(store, input)?;

        let mut layer_caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let rng = match mode {
                Mode::Train => Some(&mut self.dropout_rng),
                Mode::Eval => None,
            };
            let (out, cache) = layer.forward(store, &x, rng);
            layer_caches.push(cache);
            x = out;
        }

        let top_hidden = self.config.top_hidden_dim();
        let flat = x.reshape(&[batch * time, top_hidden]);
        let (logits, projection_cache) = self.projection.forward(store, &flat);
        let logits = logits.reshape(&[batch, time, self.config.vocab_size]);

        Ok(Forward {
            logits,
            cache: ForwardCache {
                input: input.clone(),
                layer_caches,
                projection_cache,
            },
        })
    }

    /// Gradients of every parameter given d(loss)/d(logits)
    pub fn backward(
        &self,
        store: &ParamStore,
        cache: &ForwardCache,
        grad_logits: &Tensor,
    ) -> Result<Gradients> {
        let (batch, time) = cache.input.shape();
        let vocab = self.config.vocab_size;
        let expected = vec![batch, time, vocab];
        if grad_logits.shape != expected {
            return Err(LmError::ShapeMismatch {
                context: "LstmLanguageModel::backward",
                expected,
                actual: grad_logits.shape.clone(),
            });
        }

        let mut grads = Gradients::zeros_like(store);

        let flat = grad_logits.reshape(&[batch * time, vocab]);
        let grad_top = self
            .projection
            .backward(store, &mut grads, &flat, &cache.projection_cache);
        let mut grad_x = grad_top.reshape(&[batch, time, self.config.top_hidden_dim()]);

        for (layer, layer_cache) in self.layers.iter().zip(&cache.layer_caches).rev() {
            grad_x = layer.backward(store, &mut grads, &grad_x, layer_cache);
        }

        self.embedding.backward(&mut grads, &cache.input, &grad_x);
        Ok(grads)
    }
}

/// Output of one forward pass
pub struct Forward {
    pub logits: Tensor,
    pub cache: ForwardCache,
}

/// Values saved for [`LstmLanguageModel::backward`]
pub struct ForwardCache {
    input: TokenBatch,
    layer_caches: Vec<LstmCache>,
    projection_cache: LinearCache,
}

/// Everything the model builder hands back
pub struct Inference {
    pub model: LstmLanguageModel,
    pub logits: Tensor,
    pub pretrainable_params: Vec<ParamId>,
    pub output_only_params: Vec<ParamId>,
    pub cache: ForwardCache,
}

/// Build a model in `store` and run it once on `input_x`
///
/// Returns the logits together with both parameter partitions and the
/// model itself for later passes.
pub fn inference(
    input_x: &TokenBatch,
    config: &ModelConfig,
    store: &mut ParamStore,
    mode: Mode,
) -> Result<Inference> {
    let mut model = LstmLanguageModel::build(config, store)?;
    let Forward { logits, cache } = model.forward(store, input_x, mode)?;
    Ok(Inference {
        pretrainable_params: model.pretrainable_params().to_vec(),
        output_only_params: model.output_only_params().to_vec(),
        model,
        logits,
        cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config() -> ModelConfig {
        ModelConfig {
            vocab_size: 5,
            embedding_dim: 4,
            lstm_hidden_dim_1: 6,
            lstm_hidden_dim_2: None,
            keep_prob: None,
            seed: 42,
        }
    }

    fn batch() -> TokenBatch {
        TokenBatch::from_rows(&[vec![0, 1, 2], vec![3, 4, 0]]).unwrap()
    }

    #[test]
    fn test_logits_shape_and_partitions() {
        let mut store = ParamStore::new();
        let out = inference(&batch(), &config(), &mut store, Mode::Eval).unwrap();
        assert_eq!(out.logits.shape, vec![2, 3, 5]);
        assert!(out.pretrainable_params.len() >= 3);
        assert_eq!(out.output_only_params.len(), 2);

        let pre: HashSet<_> = out.pretrainable_params.iter().collect();
        let post: HashSet<_> = out.output_only_params.iter().collect();
        assert!(pre.is_disjoint(&post));
        let all: HashSet<_> = store.ids().collect();
        let union: HashSet<_> = pre.union(&post).map(|&&id| id).collect();
        assert_eq!(all, union);

        assert_eq!(store.name(out.pretrainable_params[0]), "embedding/emb");
        assert_eq!(store.name(out.output_only_params[0]), "output_linear/W");
        assert_eq!(store.name(out.output_only_params[1]), "output_linear/b");
        assert!(store.get(out.output_only_params[1]).data.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_same_seed_same_logits() {
        let mut a = ParamStore::new();
        let mut b = ParamStore::new();
        let la = inference(&batch(), &config(), &mut a, Mode::Eval).unwrap().logits;
        let lb = inference(&batch(), &config(), &mut b, Mode::Eval).unwrap().logits;
        assert_eq!(la, lb);
    }

    #[test]
    fn test_second_layer_feeds_projection() {
        let mut cfg = config();
        cfg.lstm_hidden_dim_2 = Some(3);
        let mut store = ParamStore::new();
        let out = inference(&batch(), &cfg, &mut store, Mode::Eval).unwrap();
        assert_eq!(out.model.num_layers(), 2);
        assert_eq!(out.pretrainable_params.len(), 7);
        assert_eq!(store.get(out.output_only_params[0]).shape, vec![3, 5]);
        assert_eq!(out.logits.shape, vec![2, 3, 5]);
    }

    #[test]
    fn test_invalid_config_allocates_nothing() {
        let mut cfg = config();
        cfg.vocab_size = 0;
        let mut store = ParamStore::new();
        assert!(matches!(
            LstmLanguageModel::build(&cfg, &mut store),
            Err(LmError::Config(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_out_of_vocab_token() {
        let mut store = ParamStore::new();
        let input = TokenBatch::from_rows(&[vec![0, 9]]).unwrap();
        assert!(matches!(
            inference(&input, &config(), &mut store, Mode::Eval),
            Err(LmError::TokenOutOfRange { id: 9, .. })
        ));
    }

    #[test]
    fn test_store_reuse_rejected() {
        let mut store = ParamStore::new();
        LstmLanguageModel::build(&config(), &mut store).unwrap();
        assert!(LstmLanguageModel::build(&config(), &mut store).is_err());
    }
}
