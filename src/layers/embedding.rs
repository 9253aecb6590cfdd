//! Embedding Layer
//!
//! Maps each token id to a row of a `[vocab_size, embedding_dim]` table.
//! The table is initialised uniformly in `[-0.5/dim, 0.5/dim]` and belongs
//! to the pretrainable parameter group.
//!
//! The backward pass scatters the output gradient back into the rows that
//! were looked up; a token appearing several times accumulates.

use crate::batch::TokenBatch;
use crate::error::Result;
use crate::params::{Gradients, ParamGroup, ParamId, ParamStore};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

use super::linear::uniform_init;

pub struct Embedding {
    pub table: ParamId,
    pub vocab_size: usize,
    pub dim: usize,
}

impl Embedding {
    pub fn new(
        store: &mut ParamStore,
        scope: &str,
        vocab_size: usize,
        dim: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let init_width = 0.5 / dim as f32;
        let table = uniform_init(vec![vocab_size, dim], -init_width, init_width, rng)?;
        let table = store.register(format!("{}/emb", scope), ParamGroup::Pretrainable, table)?;
        Ok(Self {
            table,
            vocab_size,
            dim,
        })
    }

    /// Look up every id, giving `[batch, time, dim]`
    pub fn forward(&self, store: &ParamStore, input: &TokenBatch) -> Result<Tensor> {
        input.check_vocab(self.vocab_size)?;
        let table = store.get(self.table);
        let mut data = Vec::with_capacity(input.len() * self.dim);
        for &id in input.ids() {
            data.extend_from_slice(&table.data[id * self.dim..(id + 1) * self.dim]);
        }
        let (batch, time) = input.shape();
        Ok(Tensor::new(data, vec![batch, time, self.dim]))
    }

    pub fn backward(&self, grads: &mut Gradients, input: &TokenBatch, grad_out: &Tensor) {
        let grad_table = grads.get_mut(self.table);
        for (pos, &id) in input.ids().iter().enumerate() {
            let src = &grad_out.data[pos * self.dim..(pos + 1) * self.dim];
            let dst = &mut grad_table.data[id * self.dim..(id + 1) * self.dim];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
    }
}
