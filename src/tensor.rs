//! Tensor Operations for Recurrent Networks
//!
//! This module provides the minimal dense tensor the LSTM pipeline needs.
//! Tensors store multi-dimensional arrays with shape and stride information.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, time, dim]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! Sequence tensors are laid out batch-major as `[batch, time, dim]`. The
//! recurrent layers work one time step at a time on `[batch, dim]` slices,
//! so [`Tensor::time_step`] and [`Tensor::stack_time`] convert between the
//! two views.
//!
//! ## Example
//!
//! ```rust
//! use recurrent_lm::Tensor;
//!
//! let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let c = a.matmul(&b);
//! assert_eq!(c.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Matrix multiplication and element-wise maps run through Rayon. Small
//! matrices fall back to a sequential loop to avoid scheduling overhead.

use rayon::prelude::*;

/// A multi-dimensional array of `f32` values
///
/// All operations use row-major (C-style) memory layout. For shape `[2, 3]`
/// data is stored as `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]` with strides
/// `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use recurrent_lm::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.strides, vec![2, 1]);
    /// ```
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a zero tensor with the same shape as `self`
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Inner loop of the blocked matmul, written so LLVM can vectorize it
    #[inline(always)]
    fn matmul_inner_simd(a_val: f32, b: &[f32], result: &mut [f32]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// 2D matrix multiplication
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result is
    /// `[m, n]` with `C[i,j] = sum(A[i,l] * B[l,j])`.
    ///
    /// Products with at least 1K multiply-adds use the parallel
    /// cache-blocked kernel; smaller ones run sequentially.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2D or the inner dimensions differ
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += self.data[i * k + l] * other.data[l * n + j];
                }
                result[i * n + j] = sum;
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes 8×8 blocks so the working set stays in L1, and distributes
    /// row blocks across threads.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Row-wise softmax of a 2D tensor
    ///
    /// Uses the numerically stable form
    ///
    /// ```text
    /// softmax(x)[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    /// ```
    ///
    /// # Example
    ///
    /// ```rust
    /// # use recurrent_lm::Tensor;
    /// let t = Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]);
    /// let p = t.softmax_rows();
    /// assert!((p.data.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    /// ```
    pub fn softmax_rows(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "softmax_rows expects a 2D tensor");
        let cols = self.shape[1];

        let result: Vec<f32> = self
            .data
            .par_chunks(cols)
            .flat_map_iter(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let exp_values: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
                let sum: f32 = exp_values.iter().sum();
                exp_values.into_iter().map(move |val| val / sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise addition
    ///
    /// Supports an exact shape match or broadcasting a vector over the last
    /// dimension (`[*, n] + [n]`, e.g. adding a bias).
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if let Some(&last_dim) = self.shape.last() {
            if self.shape.len() > other.shape.len() && other.data.len() == last_dim {
                let result: Vec<f32> = self
                    .data
                    .par_iter()
                    .enumerate()
                    .map(|(i, &x)| x + other.data[i % last_dim])
                    .collect();
                return Tensor::new(result, self.shape.clone());
            }
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// Element-wise multiplication (shapes must match)
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for mul");
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// In-place accumulation, used to sum gradients across time steps
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(self.shape, other.shape, "Shapes must match for add_assign");
        self.data
            .par_iter_mut()
            .zip(&other.data)
            .for_each(|(a, b)| *a += b);
    }

    /// Add scalar to all elements
    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x + scalar)
    }

    /// Apply `f` to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Logistic sigmoid
    pub fn sigmoid(&self) -> Tensor {
        self.map(|x| 1.0 / (1.0 + (-x).exp()))
    }

    /// Hyperbolic tangent
    pub fn tanh(&self) -> Tensor {
        self.map(f32::tanh)
    }

    /// Reshape tensor to new shape (element count must be unchanged)
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} to {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Transpose a 2D matrix
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "transpose expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Sum a 2D tensor over its rows, giving one value per column
    ///
    /// This is the bias gradient: `grad_b = sum(grad_y, axis=0)`.
    pub fn sum_rows(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "sum_rows expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; cols];
        for r in 0..rows {
            for (acc, &v) in result.iter_mut().zip(&self.data[r * cols..(r + 1) * cols]) {
                *acc += v;
            }
        }
        Tensor::new(result, vec![cols])
    }

    /// Repeat a `[1, n]` row `times` times, giving `[times, n]`
    pub fn tile_rows(&self, times: usize) -> Tensor {
        assert!(
            self.shape.len() == 2 && self.shape[0] == 1,
            "tile_rows expects a [1, n] tensor, got {:?}",
            self.shape
        );
        let n = self.shape[1];
        let mut data = Vec::with_capacity(times * n);
        for _ in 0..times {
            data.extend_from_slice(&self.data);
        }
        Tensor::new(data, vec![times, n])
    }

    /// Concatenate two 2D tensors along the column axis
    ///
    /// `[b, m]` and `[b, n]` become `[b, m + n]`.
    pub fn concat_cols(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2 && self.shape[0] == other.shape[0],
            "concat_cols shapes incompatible: {:?} and {:?}",
            self.shape,
            other.shape
        );
        let rows = self.shape[0];
        let m = self.shape[1];
        let n = other.shape[1];
        let mut data = Vec::with_capacity(rows * (m + n));
        for r in 0..rows {
            data.extend_from_slice(&self.data[r * m..(r + 1) * m]);
            data.extend_from_slice(&other.data[r * n..(r + 1) * n]);
        }
        Tensor::new(data, vec![rows, m + n])
    }

    /// Columns `start..end` of a 2D tensor
    pub fn slice_cols(&self, start: usize, end: usize) -> Tensor {
        assert_eq!(self.shape.len(), 2, "slice_cols expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        assert!(start <= end && end <= cols, "column range {}..{} out of bounds", start, end);
        let width = end - start;
        let mut data = Vec::with_capacity(rows * width);
        for r in 0..rows {
            data.extend_from_slice(&self.data[r * cols + start..r * cols + end]);
        }
        Tensor::new(data, vec![rows, width])
    }

    /// The `[batch, dim]` slice at time step `t` of a `[batch, time, dim]` tensor
    pub fn time_step(&self, t: usize) -> Tensor {
        assert_eq!(self.shape.len(), 3, "time_step expects a 3D tensor");
        let (batch, time, dim) = (self.shape[0], self.shape[1], self.shape[2]);
        assert!(t < time, "time step {} out of range {}", t, time);
        let mut data = Vec::with_capacity(batch * dim);
        for b in 0..batch {
            let start = (b * time + t) * dim;
            data.extend_from_slice(&self.data[start..start + dim]);
        }
        Tensor::new(data, vec![batch, dim])
    }

    /// Stack per-step `[batch, dim]` tensors into `[batch, time, dim]`
    pub fn stack_time(steps: &[Tensor]) -> Tensor {
        assert!(!steps.is_empty(), "stack_time needs at least one step");
        let batch = steps[0].shape[0];
        let dim = steps[0].shape[1];
        let time = steps.len();
        let mut data = vec![0.0; batch * time * dim];
        for (t, step) in steps.iter().enumerate() {
            assert_eq!(step.shape, vec![batch, dim], "ragged time steps");
            for b in 0..batch {
                let dst = (b * time + t) * dim;
                data[dst..dst + dim].copy_from_slice(&step.data[b * dim..(b + 1) * dim]);
            }
        }
        Tensor::new(data, vec![batch, time, dim])
    }

    /// L2 (Frobenius) norm over all elements
    ///
    /// Sequential so that clipping decisions do not depend on thread count.
    pub fn l2_norm(&self) -> f32 {
        self.data.iter().map(|&v| v * v).sum::<f32>().sqrt()
    }

    /// True when no element is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}
