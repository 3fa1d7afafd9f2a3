// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dense row-major 2-D tensors backing the AVAlign embedding pipeline.
//!
//! Everything in this crate is host-resident `f32` data with validated
//! shapes. The similarity engine builds evaluation-scale matrices by
//! writing block products into a pre-allocated tensor, so the in-place
//! entry points (`matmul_into`, `write_block`) are first-class citizens
//! rather than conveniences.

use std::fmt;

use rand::Rng;

/// Result alias used throughout the tensor crate.
pub type TensorResult<T> = Result<T, TensorError>;

/// Errors emitted by tensor constructors and operators.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorError {
    /// A constructor received a zero-sized shape.
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor does not match the declared shape.
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// A block write would land outside the destination tensor.
    BlockOutOfBounds {
        row_offset: usize,
        col_offset: usize,
        block: (usize, usize),
        dest: (usize, usize),
    },
    /// Computation received an empty input which would otherwise panic.
    EmptyInput(&'static str),
    /// Generic configuration violation for tensor helpers.
    InvalidValue { label: &'static str },
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorError::InvalidDimensions { rows, cols } => {
                write!(f, "invalid tensor dimensions: {rows}x{cols}")
            }
            TensorError::DataLength { expected, got } => {
                write!(f, "data length mismatch: expected {expected}, got {got}")
            }
            TensorError::ShapeMismatch { left, right } => {
                write!(f, "shape mismatch: left={left:?}, right={right:?}")
            }
            TensorError::BlockOutOfBounds {
                row_offset,
                col_offset,
                block,
                dest,
            } => write!(
                f,
                "block {block:?} at offset ({row_offset}, {col_offset}) exceeds destination {dest:?}"
            ),
            TensorError::EmptyInput(label) => write!(f, "empty input: {label}"),
            TensorError::InvalidValue { label } => write!(f, "invalid value: {label}"),
        }
    }
}

impl std::error::Error for TensorError {}

/// A dense row-major 2-D `f32` tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    /// Create a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> TensorResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        Ok(Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        })
    }

    /// Create a tensor from raw data. The vector must hold `rows * cols`
    /// elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> TensorResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let expected = rows * cols;
        if data.len() != expected {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Build a tensor by evaluating `f(row, col)` for every element.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> TensorResult<Self>
    where
        F: FnMut(usize, usize) -> f32,
    {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Ok(Self { data, rows, cols })
    }

    /// Construct a tensor by sampling a uniform distribution in `[min, max)`.
    ///
    /// When `seed` is provided the RNG becomes deterministic which keeps
    /// tests reproducible; otherwise the seed derives from the global
    /// determinism configuration.
    pub fn random_uniform(
        rows: usize,
        cols: usize,
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> TensorResult<Self> {
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_range",
            });
        }
        let mut rng = av_config::determinism::rng_from_optional(
            seed,
            &format!("av-tensor/random_uniform:{rows}x{cols}"),
        );
        Self::from_fn(rows, cols, |_, _| rng.gen_range(min..max))
    }

    /// Tensor shape as `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the tensor holds no elements. Constructors reject empty
    /// shapes, so this only reports true for moved-from placeholders.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Immutable view over the underlying row-major buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view over the underlying row-major buffer.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Immutable view over one row.
    pub fn row(&self, index: usize) -> TensorResult<&[f32]> {
        if index >= self.rows {
            return Err(TensorError::InvalidValue { label: "row_index" });
        }
        let offset = index * self.cols;
        Ok(&self.data[offset..offset + self.cols])
    }

    /// Copy of the rows in `[start, end)` as a new tensor.
    pub fn slice_rows(&self, start: usize, end: usize) -> TensorResult<Tensor> {
        if start >= end || end > self.rows {
            return Err(TensorError::InvalidValue {
                label: "row_slice_range",
            });
        }
        let data = self.data[start * self.cols..end * self.cols].to_vec();
        Tensor::from_vec(end - start, self.cols, data)
    }

    /// Copy of the rows selected by `indices`, in order. Duplicate indices
    /// are allowed.
    pub fn gather_rows(&self, indices: &[usize]) -> TensorResult<Tensor> {
        if indices.is_empty() {
            return Err(TensorError::EmptyInput("gather_rows_indices"));
        }
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &index in indices {
            data.extend_from_slice(self.row(index)?);
        }
        Tensor::from_vec(indices.len(), self.cols, data)
    }

    /// Matrix multiply, allocating the destination.
    pub fn matmul(&self, other: &Tensor) -> TensorResult<Tensor> {
        let mut dst = Tensor::zeros(self.rows, other.cols)?;
        self.matmul_into(other, &mut dst)?;
        Ok(dst)
    }

    /// Matrix multiply into a pre-allocated destination tensor.
    pub fn matmul_into(&self, other: &Tensor, dst: &mut Tensor) -> TensorResult<()> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        if dst.rows != self.rows || dst.cols != other.cols {
            return Err(TensorError::ShapeMismatch {
                left: (self.rows, other.cols),
                right: dst.shape(),
            });
        }
        let inner = self.cols;
        let out_cols = other.cols;
        for i in 0..self.rows {
            let lhs_row = &self.data[i * inner..(i + 1) * inner];
            let dst_row = &mut dst.data[i * out_cols..(i + 1) * out_cols];
            dst_row.fill(0.0);
            for (k, &lhs) in lhs_row.iter().enumerate() {
                let rhs_row = &other.data[k * out_cols..(k + 1) * out_cols];
                for (dst_value, &rhs) in dst_row.iter_mut().zip(rhs_row.iter()) {
                    *dst_value += lhs * rhs;
                }
            }
        }
        Ok(())
    }

    /// Transposed copy of the tensor.
    pub fn transpose(&self) -> Tensor {
        let mut data = vec![0.0; self.data.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Tensor {
            data,
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Concatenate tensors along the row axis. All inputs must agree on the
    /// column count.
    pub fn cat_rows(tensors: &[Tensor]) -> TensorResult<Tensor> {
        let first = tensors.first().ok_or(TensorError::EmptyInput("cat_rows"))?;
        let cols = first.cols;
        let mut rows = 0;
        for tensor in tensors {
            if tensor.cols != cols {
                return Err(TensorError::ShapeMismatch {
                    left: (first.rows, cols),
                    right: tensor.shape(),
                });
            }
            rows += tensor.rows;
        }
        let mut data = Vec::with_capacity(rows * cols);
        for tensor in tensors {
            data.extend_from_slice(&tensor.data);
        }
        Tensor::from_vec(rows, cols, data)
    }

    /// Write `block` into the destination starting at the given offsets.
    /// Bounds are validated before any element is touched.
    pub fn write_block(
        &mut self,
        row_offset: usize,
        col_offset: usize,
        block: &Tensor,
    ) -> TensorResult<()> {
        if row_offset + block.rows > self.rows || col_offset + block.cols > self.cols {
            return Err(TensorError::BlockOutOfBounds {
                row_offset,
                col_offset,
                block: block.shape(),
                dest: self.shape(),
            });
        }
        for r in 0..block.rows {
            let src = &block.data[r * block.cols..(r + 1) * block.cols];
            let dst_start = (row_offset + r) * self.cols + col_offset;
            self.data[dst_start..dst_start + block.cols].copy_from_slice(src);
        }
        Ok(())
    }
}

/// A batch of spatial feature maps shaped `[batch, channels, height, width]`,
/// stored flattened in row-major order.
///
/// Embedding networks may return their features before global pooling; this
/// type carries the spatial form until the pipeline flattens it.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMap {
    data: Vec<f32>,
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl FeatureMap {
    /// Validate and wrap a flattened `[batch, channels, height, width]`
    /// buffer.
    pub fn new(
        batch: usize,
        channels: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
    ) -> TensorResult<Self> {
        if batch == 0 || channels == 0 || height == 0 || width == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: batch * channels,
                cols: height * width,
            });
        }
        let expected = batch * channels * height * width;
        if data.len() != expected {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            batch,
            channels,
            height,
            width,
        })
    }

    /// Batch dimension.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Channel dimension.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Spatial shape as `(height, width)`.
    pub fn spatial(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Immutable view over the flattened buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Average-pool the spatial grid away, producing a `[batch, channels]`
    /// tensor. This is the canonical reduction applied before similarity
    /// computation.
    pub fn average_pool(&self) -> TensorResult<Tensor> {
        let spatial = self.height * self.width;
        let mut data = Vec::with_capacity(self.batch * self.channels);
        for b in 0..self.batch {
            for c in 0..self.channels {
                let offset = (b * self.channels + c) * spatial;
                let sum: f32 = self.data[offset..offset + spatial].iter().sum();
                data.push(sum / spatial as f32);
            }
        }
        Tensor::from_vec(self.batch, self.channels, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_mismatched_lengths() {
        let err = Tensor::from_vec(2, 3, vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            TensorError::DataLength {
                expected: 6,
                got: 5
            }
        );
    }

    #[test]
    fn zeros_rejects_empty_shapes() {
        assert!(Tensor::zeros(0, 4).is_err());
        assert!(Tensor::zeros(4, 0).is_err());
    }

    #[test]
    fn matmul_matches_hand_computed_product() {
        let a = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let product = a.matmul(&b).unwrap();
        assert_eq!(product.shape(), (2, 2));
        assert_eq!(product.data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn matmul_into_rejects_bad_destination() {
        let a = Tensor::from_vec(2, 2, vec![1.0; 4]).unwrap();
        let b = Tensor::from_vec(2, 2, vec![1.0; 4]).unwrap();
        let mut dst = Tensor::zeros(3, 2).unwrap();
        assert!(a.matmul_into(&b, &mut dst).is_err());
    }

    #[test]
    fn transpose_round_trips() {
        let tensor = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let twice = tensor.transpose().transpose();
        assert_eq!(tensor, twice);
    }

    #[test]
    fn cat_rows_stacks_in_order() {
        let top = Tensor::from_vec(1, 2, vec![1.0, 2.0]).unwrap();
        let bottom = Tensor::from_vec(2, 2, vec![3.0, 4.0, 5.0, 6.0]).unwrap();
        let stacked = Tensor::cat_rows(&[top, bottom]).unwrap();
        assert_eq!(stacked.shape(), (3, 2));
        assert_eq!(stacked.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn gather_rows_preserves_selection_order() {
        let tensor = Tensor::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let gathered = tensor.gather_rows(&[2, 0]).unwrap();
        assert_eq!(gathered.data(), &[5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn write_block_validates_bounds_before_writing() {
        let mut dest = Tensor::zeros(4, 4).unwrap();
        let block = Tensor::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        dest.write_block(1, 2, &block).unwrap();
        assert_eq!(dest.row(1).unwrap(), &[0.0, 0.0, 1.0, 2.0]);
        assert_eq!(dest.row(2).unwrap(), &[0.0, 0.0, 3.0, 4.0]);

        let err = dest.write_block(3, 3, &block).unwrap_err();
        assert!(matches!(err, TensorError::BlockOutOfBounds { .. }));
        assert_eq!(dest.row(3).unwrap(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn average_pool_reduces_spatial_grid_to_mean() {
        // One sample, two channels over a 2x2 grid.
        let map = FeatureMap::new(
            1,
            2,
            2,
            2,
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
        )
        .unwrap();
        let pooled = map.average_pool().unwrap();
        assert_eq!(pooled.shape(), (1, 2));
        assert_eq!(pooled.data(), &[2.5, 25.0]);
    }

    #[test]
    fn random_uniform_is_deterministic_under_a_seed() {
        let first = Tensor::random_uniform(3, 4, -1.0, 1.0, Some(7)).unwrap();
        let second = Tensor::random_uniform(3, 4, -1.0, 1.0, Some(7)).unwrap();
        assert_eq!(first, second);
        assert!(first.data().iter().all(|v| (-1.0..1.0).contains(v)));
    }
}
