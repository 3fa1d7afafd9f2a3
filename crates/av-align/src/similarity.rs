// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pairwise dot-product similarity between embedding batches.
//!
//! Training-scale batches go through [`similarity`] directly. Evaluation
//! sets reach tens of thousands of rows, so [`tiled_similarity`] builds the
//! full matrix from fixed-size block products written into one
//! pre-allocated host tensor: tiling bounds peak memory without changing
//! the result beyond floating-point associativity.

use av_tensor::Tensor;

use crate::{AlignError, AlignResult};

/// Half-open block of row indices produced by [`block_ranges`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub start: usize,
    pub len: usize,
}

impl BlockRange {
    /// Exclusive end of the block.
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Splits `[0, extent)` into consecutive blocks of at most `block` indices.
/// The final block carries the remainder and may be shorter.
pub fn block_ranges(extent: usize, block: usize) -> impl Iterator<Item = BlockRange> {
    debug_assert!(block > 0);
    (0..extent).step_by(block.max(1)).map(move |start| BlockRange {
        start,
        len: block.min(extent - start),
    })
}

fn validate_pairwise(a: &Tensor, b: &Tensor) -> AlignResult<()> {
    if a.cols() != b.cols() {
        return Err(AlignError::Shape(format!(
            "embedding dimensions disagree: rows carry {} features, columns carry {}",
            a.cols(),
            b.cols()
        )));
    }
    Ok(())
}

/// Dense similarity `S[i][j] = Σ_d a[i][d]·b[j][d]` for `a: N×D`, `b: M×D`.
pub fn similarity(a: &Tensor, b: &Tensor) -> AlignResult<Tensor> {
    validate_pairwise(a, b)?;
    Ok(a.matmul(&b.transpose())?)
}

/// Tiled construction of the full N×M similarity matrix.
///
/// Both axes are split with [`block_ranges`]; every block pair is
/// multiplied independently and written back into the pre-allocated
/// output. Preconditions (matching feature dimensions, a positive block
/// size) are validated once here, never per tile, and the trailing blocks
/// are sized from the actual remainder.
pub fn tiled_similarity(a: &Tensor, b: &Tensor, block_size: usize) -> AlignResult<Tensor> {
    if block_size == 0 {
        return Err(AlignError::InvalidArgument(
            "similarity block size must be > 0".to_string(),
        ));
    }
    validate_pairwise(a, b)?;

    let mut full = Tensor::zeros(a.rows(), b.rows())?;
    for row_block in block_ranges(a.rows(), block_size) {
        let a_block = a.slice_rows(row_block.start, row_block.end())?;
        for col_block in block_ranges(b.rows(), block_size) {
            let b_block = b.slice_rows(col_block.start, col_block.end())?;
            let tile = a_block.matmul(&b_block.transpose())?;
            full.write_block(row_block.start, col_block.start, &tile)?;
        }
    }
    Ok(full)
}
