//! LSTM Layer
//!
//! A single recurrent layer unrolled over the time axis of a
//! `[batch, time, input_dim]` sequence.
//!
//! ## Cell
//!
//! One fused kernel multiplies the concatenated `[x_t, h_{t-1}]`:
//!
//! ```text
//! z = [x_t, h_{t-1}] @ K + b          K: [input_dim + H, 4H], b: [4H]
//! i = σ(z[0:H])                       input gate
//! j = tanh(z[H:2H])                   candidate
//! f = σ(z[2H:3H] + 1.0)               forget gate (constant forget bias)
//! o = σ(z[3H:4H])                     output gate
//! c_t = f ⊙ c_{t-1} + i ⊙ j
//! h_t = o ⊙ tanh(c_t)
//! ```
//!
//! ## Initial State
//!
//! Both `h_0` and `c_0` are a learned `[1, H]` vector tiled over the batch,
//! so the starting state is trained along with the weights. Its gradient is
//! the batch sum of `dh_0 + dc_0`.
//!
//! ## Dropout
//!
//! With a keep probability configured, training passes drop each step's
//! input before it enters the cell and each step's output after it leaves.
//! The recurrent state itself is never dropped.

use crate::error::Result;
use crate::params::{Gradients, ParamGroup, ParamId, ParamStore};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

use super::dropout::{Dropout, DropoutCache};
use super::linear::{glorot_uniform, uniform_init};

const FORGET_BIAS: f32 = 1.0;

pub struct Lstm {
    pub initial_state: ParamId,
    pub kernel: ParamId,
    pub bias: ParamId,
    pub input_dim: usize,
    pub hidden_dim: usize,
    dropout: Option<Dropout>,
}

impl Lstm {
    /// Register `{scope}/initial_state_vector`, `{scope}/kernel` and
    /// `{scope}/bias` as pretrainable parameters
    pub fn new(
        store: &mut ParamStore,
        scope: &str,
        input_dim: usize,
        hidden_dim: usize,
        keep_prob: Option<f32>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let limit = (6.0 / (1 + hidden_dim) as f32).sqrt();
        let initial_state = store.register(
            format!("{}/initial_state_vector", scope),
            ParamGroup::Pretrainable,
            uniform_init(vec![1, hidden_dim], -limit, limit, rng)?,
        )?;
        let kernel = store.register(
            format!("{}/kernel", scope),
            ParamGroup::Pretrainable,
            glorot_uniform(input_dim + hidden_dim, 4 * hidden_dim, rng)?,
        )?;
        let bias = store.register(
            format!("{}/bias", scope),
            ParamGroup::Pretrainable,
            Tensor::zeros(vec![4 * hidden_dim]),
        )?;
        Ok(Self {
            initial_state,
            kernel,
            bias,
            input_dim,
            hidden_dim,
            dropout: keep_prob.map(Dropout::new),
        })
    }

    /// Parameter handles in declaration order
    pub fn params(&self) -> [ParamId; 3] {
        [self.initial_state, self.kernel, self.bias]
    }

    /// Unroll over `x: [batch, time, input_dim]`, giving `[batch, time, H]`
    ///
    /// Pass `rng` to enable dropout (training); `None` runs deterministically.
    pub fn forward(
        &self,
        store: &ParamStore,
        x: &Tensor,
        mut rng: Option<&mut StdRng>,
    ) -> (Tensor, LstmCache) {
        let batch = x.shape[0];
        let time = x.shape[1];
        let hidden = self.hidden_dim;
        let kernel = store.get(self.kernel);
        let bias = store.get(self.bias);

        let init = store.get(self.initial_state).tile_rows(batch);
        let mut h = init.clone();
        let mut c = init;

        let mut outputs = Vec::with_capacity(time);
        let mut steps = Vec::with_capacity(time);

        for t in 0..time {
            let (x_t, input_mask) = self.drop(&x.time_step(t), rng.as_deref_mut());

            let xh = x_t.concat_cols(&h);
            let z = xh.matmul(kernel).add(bias);

            let i = z.slice_cols(0, hidden).sigmoid();
            let j = z.slice_cols(hidden, 2 * hidden).tanh();
            let f = z.slice_cols(2 * hidden, 3 * hidden).add_scalar(FORGET_BIAS).sigmoid();
            let o = z.slice_cols(3 * hidden, 4 * hidden).sigmoid();

            let c_next = f.mul(&c).add(&i.mul(&j));
            let tanh_c = c_next.tanh();
            let h_next = o.mul(&tanh_c);

            let (out_t, output_mask) = self.drop(&h_next, rng.as_deref_mut());
            outputs.push(out_t);

            steps.push(LstmStepCache {
                xh,
                i,
                j,
                f,
                o,
                c_prev: c,
                tanh_c,
                input_mask,
                output_mask,
            });

            h = h_next;
            c = c_next;
        }

        (Tensor::stack_time(&outputs), LstmCache { steps, batch })
    }

    fn drop(&self, x: &Tensor, rng: Option<&mut StdRng>) -> (Tensor, Option<DropoutCache>) {
        match &self.dropout {
            Some(dropout) => {
                let (y, cache) = dropout.forward(x, rng);
                (y, Some(cache))
            }
            None => (x.clone(), None),
        }
    }

    fn undrop(&self, grad: Tensor, cache: &Option<DropoutCache>) -> Tensor {
        match (&self.dropout, cache) {
            (Some(dropout), Some(cache)) => dropout.backward(&grad, cache),
            _ => grad,
        }
    }

    /// Backpropagation through time
    ///
    /// `grad_outputs` is `[batch, time, H]`. Accumulates kernel, bias and
    /// initial-state gradients, and returns `[batch, time, input_dim]`.
    pub fn backward(
        &self,
        store: &ParamStore,
        grads: &mut Gradients,
        grad_outputs: &Tensor,
        cache: &LstmCache,
    ) -> Tensor {
        let hidden = self.hidden_dim;
        let kernel_t = store.get(self.kernel).transpose();

        let mut grad_kernel = store.get(self.kernel).zeros_like();
        let mut grad_bias = Tensor::zeros(vec![4 * hidden]);
        let mut dh_next = Tensor::zeros(vec![cache.batch, hidden]);
        let mut dc_next = Tensor::zeros(vec![cache.batch, hidden]);
        let mut grad_inputs = Vec::with_capacity(cache.steps.len());

        for (t, step) in cache.steps.iter().enumerate().rev() {
            let dout = self.undrop(grad_outputs.time_step(t), &step.output_mask);
            let dh = dout.add(&dh_next);

            let d_o = dh.mul(&step.tanh_c).mul(&sigmoid_grad(&step.o));
            let dc = dh
                .mul(&step.o)
                .mul(&tanh_grad(&step.tanh_c))
                .add(&dc_next);

            let di = dc.mul(&step.j).mul(&sigmoid_grad(&step.i));
            let dj = dc.mul(&step.i).mul(&tanh_grad(&step.j));
            let df = dc.mul(&step.c_prev).mul(&sigmoid_grad(&step.f));
            dc_next = dc.mul(&step.f);

            let dz = di.concat_cols(&dj).concat_cols(&df).concat_cols(&d_o);
            grad_kernel.add_assign(&step.xh.transpose().matmul(&dz));
            grad_bias.add_assign(&dz.sum_rows());

            let dxh = dz.matmul(&kernel_t);
            let dx = dxh.slice_cols(0, self.input_dim);
            dh_next = dxh.slice_cols(self.input_dim, self.input_dim + hidden);

            grad_inputs.push(self.undrop(dx, &step.input_mask));
        }

        grads.accumulate(self.kernel, &grad_kernel);
        grads.accumulate(self.bias, &grad_bias);
        let grad_init = dh_next.add(&dc_next).sum_rows().reshape(&[1, hidden]);
        grads.accumulate(self.initial_state, &grad_init);

        grad_inputs.reverse();
        Tensor::stack_time(&grad_inputs)
    }
}

/// σ'(z) expressed through s = σ(z)
fn sigmoid_grad(s: &Tensor) -> Tensor {
    s.map(|v| v * (1.0 - v))
}

/// tanh'(z) expressed through t = tanh(z)
fn tanh_grad(t: &Tensor) -> Tensor {
    t.map(|v| 1.0 - v * v)
}

struct LstmStepCache {
    xh: Tensor,
    i: Tensor,
    j: Tensor,
    f: Tensor,
    o: Tensor,
    c_prev: Tensor,
    tanh_c: Tensor,
    input_mask: Option<DropoutCache>,
    output_mask: Option<DropoutCache>,
}

/// Values saved by [`Lstm::forward`] for backpropagation through time
pub struct LstmCache {
    steps: Vec<LstmStepCache>,
    batch: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn layer(keep_prob: Option<f32>) -> (ParamStore, Lstm) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut store = ParamStore::new();
        let lstm = Lstm::new(&mut store, "recurrent_layer1", 3, 4, keep_prob, &mut rng).unwrap();
        (store, lstm)
    }

    #[test]
    fn test_forward_shape_and_param_shapes() {
        let (store, lstm) = layer(None);
        assert_eq!(store.get(lstm.kernel).shape, vec![7, 16]);
        assert_eq!(store.get(lstm.bias).shape, vec![16]);
        assert_eq!(store.get(lstm.initial_state).shape, vec![1, 4]);

        let x = Tensor::new((0..2 * 5 * 3).map(|i| (i as f32 * 0.1).sin()).collect(), vec![2, 5, 3]);
        let (out, _) = lstm.forward(&store, &x, None);
        assert_eq!(out.shape, vec![2, 5, 4]);
        assert!(out.data.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_identical_rows_share_initial_state() {
        let (store, lstm) = layer(None);
        let row: Vec<f32> = (0..6).map(|i| i as f32 * 0.2).collect();
        let x = Tensor::new([row.clone(), row].concat(), vec![2, 2, 3]);
        let (out, _) = lstm.forward(&store, &x, None);
        assert_eq!(&out.data[..8], &out.data[8..]);
    }

    #[test]
    fn test_backward_fills_every_gradient() {
        let (store, lstm) = layer(None);
        let x = Tensor::new(vec![0.5; 2 * 3 * 3], vec![2, 3, 3]);
        let (out, cache) = lstm.forward(&store, &x, None);
        let mut grads = Gradients::zeros_like(&store);
        let grad_x = lstm.backward(&store, &mut grads, &out.map(|_| 1.0), &cache);
        assert_eq!(grad_x.shape, x.shape);
        for id in lstm.params() {
            assert!(grads.get(id).l2_norm() > 0.0, "{} has no gradient", store.name(id));
        }
    }

    #[test]
    fn test_dropout_only_in_training() {
        let (store, lstm) = layer(Some(0.5));
        let x = Tensor::new(vec![1.0; 3 * 4 * 3], vec![3, 4, 3]);
        let (eval_a, _) = lstm.forward(&store, &x, None);
        let (eval_b, _) = lstm.forward(&store, &x, None);
        assert_eq!(eval_a, eval_b);

        let mut rng = StdRng::seed_from_u64(5);
        let (train, _) = lstm.forward(&store, &x, Some(&mut rng));
        assert!(train.data.iter().any(|&v| v == 0.0));
    }
}
