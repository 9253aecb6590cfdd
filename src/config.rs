//! Model and Training Configuration
//!
//! Hyperparameters for the recurrent language model and its training step.
//! Both structs are serde (de)serialisable so runs can be described in a
//! JSON file; missing fields fall back to the defaults.
//!
//! ## Example
//!
//! ```rust
//! use recurrent_lm::ModelConfig;
//!
//! let config = ModelConfig::tiny(512);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{LmError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Architecture of the LSTM language model
///
/// # Fields
///
/// - `vocab_size`: Number of tokens in vocabulary
/// - `embedding_dim`: Width of the embedding table
/// - `lstm_hidden_dim_1`: Hidden size of the bottom LSTM layer
/// - `lstm_hidden_dim_2`: Hidden size of an optional second LSTM layer
/// - `keep_prob`: Dropout keep probability for the LSTM inputs and outputs
/// - `seed`: Seed for weight initialisation and dropout masks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub lstm_hidden_dim_1: usize,
    pub lstm_hidden_dim_2: Option<usize>,
    pub keep_prob: Option<f32>,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 10_000,
            embedding_dim: 200,
            lstm_hidden_dim_1: 200,
            lstm_hidden_dim_2: None,
            keep_prob: None,
            seed: 12345,
        }
    }
}

impl ModelConfig {
    /// Tiny config for tests and quick experiments
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            embedding_dim: 16,
            lstm_hidden_dim_1: 32,
            lstm_hidden_dim_2: None,
            keep_prob: None,
            seed: 12345,
        }
    }

    /// Small two-layer config with dropout
    pub fn small(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            embedding_dim: 128,
            lstm_hidden_dim_1: 256,
            lstm_hidden_dim_2: Some(256),
            keep_prob: Some(0.8),
            seed: 12345,
        }
    }

    /// Hidden size feeding the output projection
    pub fn top_hidden_dim(&self) -> usize {
        self.lstm_hidden_dim_2.unwrap_or(self.lstm_hidden_dim_1)
    }

    /// Check every dimension before anything is allocated
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(LmError::config("vocab_size must be positive"));
        }
        if self.embedding_dim == 0 {
            return Err(LmError::config("embedding_dim must be positive"));
        }
        if self.lstm_hidden_dim_1 == 0 {
            return Err(LmError::config("lstm_hidden_dim_1 must be positive"));
        }
        if self.lstm_hidden_dim_2 == Some(0) {
            return Err(LmError::config("lstm_hidden_dim_2 must be positive when set"));
        }
        if let Some(p) = self.keep_prob {
            if !(p > 0.0 && p <= 1.0) {
                return Err(LmError::config(format!(
                    "keep_prob must be in (0, 1], got {}",
                    p
                )));
            }
        }
        Ok(())
    }

    /// Load and validate a config from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Hyperparameters of the training step
///
/// `learning_rate` is the default the driver passes to each step; the step
/// itself accepts a per-call value so schedules stay outside the crate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub learning_rate: f32,
    /// Per-tensor L2 clipping threshold
    pub grad_norm: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Weight of the optional entropy term in the training loss
    pub entropy_reg: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            grad_norm: 5.0,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            entropy_reg: 0.0,
        }
    }
}

impl TrainConfig {
    pub fn tiny() -> Self {
        Self {
            learning_rate: 1e-2,
            ..Self::default()
        }
    }

    pub fn small() -> Self {
        Self {
            learning_rate: 2e-3,
            grad_norm: 1.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("learning_rate", self.learning_rate)?;
        check_positive("grad_norm", self.grad_norm)?;
        check_positive("epsilon", self.epsilon)?;
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(LmError::config(format!("{} must be in [0, 1), got {}", name, beta)));
            }
        }
        if !self.entropy_reg.is_finite() {
            return Err(LmError::config("entropy_reg must be finite"));
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn check_positive(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(LmError::config(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}
