//! Neural Network Layers
//!
//! The layers that make up the recurrent language model. Each provides a
//! forward pass returning its output plus a cache, and a backward pass
//! consuming that cache.
//!
//! ## Layers
//!
//! - **embedding**: Token id → vector lookup table
//! - **lstm**: Single LSTM layer unrolled over time
//! - **dropout**: Inverted dropout used around the LSTM cell
//! - **linear**: Output projection to vocabulary logits
//!
//! ## Design Pattern
//!
//! Parameters are not owned by the layers. Each layer registers its tensors
//! in a shared [`ParamStore`](crate::params::ParamStore) and keeps the
//! returned handles:
//!
//! ```rust,ignore
//! impl Layer {
//!     pub fn new(store: &mut ParamStore, scope: &str, ...) -> Result<Self> { }
//!     pub fn forward(&self, store: &ParamStore, x: &Tensor) -> (Tensor, Cache) { }
//!     pub fn backward(&self, store: &ParamStore, grads: &mut Gradients,
//!                     grad: &Tensor, cache: &Cache) -> Tensor { }
//! }
//! ```

pub mod dropout;
pub mod embedding;
pub mod linear;
pub mod lstm;

pub use dropout::{Dropout, DropoutCache};
pub use embedding::Embedding;
pub use linear::{glorot_uniform, uniform_init, Linear, LinearCache};
pub use lstm::{Lstm, LstmCache};
