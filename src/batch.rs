//! Token Batches
//!
//! A [`TokenBatch`] is the 2D `[batch_size, time_steps]` array of token ids
//! the model consumes; the gold labels for the loss use the same type. It
//! is produced by an external data supplier and never mutated by the
//! pipeline.

use crate::error::{LmError, Result};

/// Row-major `[batch_size, time_steps]` token ids
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBatch {
    ids: Vec<usize>,
    batch_size: usize,
    time_steps: usize,
}

impl TokenBatch {
    /// Wrap flat row-major ids
    ///
    /// Fails with a shape error if `ids.len() != batch_size * time_steps`
    /// or either dimension is zero.
    pub fn new(ids: Vec<usize>, batch_size: usize, time_steps: usize) -> Result<Self> {
        if batch_size == 0 || time_steps == 0 || ids.len() != batch_size * time_steps {
            return Err(LmError::ShapeMismatch {
                context: "TokenBatch::new",
                expected: vec![batch_size, time_steps],
                actual: vec![ids.len()],
            });
        }
        Ok(Self {
            ids,
            batch_size,
            time_steps,
        })
    }

    /// Build from equal-length rows
    ///
    /// # Example
    ///
    /// ```rust
    /// # use recurrent_lm::TokenBatch;
    /// let batch = TokenBatch::from_rows(&[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
    /// assert_eq!(batch.shape(), (2, 3));
    /// assert_eq!(batch.get(1, 0), 4);
    /// ```
    pub fn from_rows(rows: &[Vec<usize>]) -> Result<Self> {
        let time_steps = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != time_steps) {
            return Err(LmError::ShapeMismatch {
                context: "TokenBatch::from_rows",
                expected: vec![rows.len(), time_steps],
                actual: vec![rows.len(), bad.len()],
            });
        }
        let ids = rows.iter().flatten().copied().collect();
        Self::new(ids, rows.len(), time_steps)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn time_steps(&self) -> usize {
        self.time_steps
    }

    /// `(batch_size, time_steps)`
    pub fn shape(&self) -> (usize, usize) {
        (self.batch_size, self.time_steps)
    }

    /// Total number of positions
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, b: usize, t: usize) -> usize {
        self.ids[b * self.time_steps + t]
    }

    /// Flat row-major ids
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// Fail if any id is outside `0..vocab_size`
    pub fn check_vocab(&self, vocab_size: usize) -> Result<()> {
        match self.ids.iter().find(|&&id| id >= vocab_size) {
            Some(&id) => Err(LmError::TokenOutOfRange { id, vocab_size }),
            None => Ok(()),
        }
    }
}
