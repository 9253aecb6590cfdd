//! Error types
//!
//! Every builder in the pipeline fails fast: configuration problems are
//! caught before any tensor is allocated, shape problems are caught before
//! any loss is computed. Nothing here is retried internally.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, LmError>;

/// Errors surfaced by the model, loss and training builders
#[derive(Error, Debug)]
pub enum LmError {
    /// Invalid dimension or hyperparameter
    #[error("configuration error: {0}")]
    Config(String),

    /// Two tensors that must agree on their leading dimensions do not
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A token or label id outside the vocabulary
    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    /// A restore referenced a parameter the store does not know about
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl LmError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        LmError::Config(msg.into())
    }
}
