// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Recall@K over a similarity matrix whose diagonal encodes ground truth.

use av_tensor::Tensor;

use crate::{AlignError, AlignResult};

/// Fraction of rows whose own index lands among the K highest-similarity
/// columns.
///
/// Ties are broken by original column index (lower wins), so the result
/// is deterministic regardless of the sort implementation. K is capped at
/// the number of columns.
pub fn recall_at_k(similarity: &Tensor, k: usize) -> AlignResult<f32> {
    if k == 0 {
        return Err(AlignError::InvalidArgument(
            "recall requires k >= 1".to_string(),
        ));
    }
    let (rows, cols) = similarity.shape();
    if rows != cols {
        return Err(AlignError::Shape(format!(
            "diagonal ground truth needs a square matrix, got {rows}x{cols}"
        )));
    }
    let k = k.min(cols);

    let mut hits = 0usize;
    let mut order: Vec<usize> = Vec::with_capacity(cols);
    for i in 0..rows {
        let row = similarity.row(i)?;
        order.clear();
        order.extend(0..cols);
        // Descending score; ties fall back to ascending column index.
        order.sort_by(|&left, &right| {
            row[right]
                .total_cmp(&row[left])
                .then_with(|| left.cmp(&right))
        });
        if order[..k].contains(&i) {
            hits += 1;
        }
    }
    Ok(hits as f32 / rows as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> Tensor {
        Tensor::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.0 }).unwrap()
    }

    #[test]
    fn identity_similarity_scores_perfect_recall() {
        for n in [1, 3, 8] {
            for k in [1, 2, 10] {
                assert_eq!(recall_at_k(&identity(n), k).unwrap(), 1.0);
            }
        }
    }

    #[test]
    fn recall_is_monotone_in_k() {
        let similarity = Tensor::from_vec(
            3,
            3,
            vec![0.1, 0.9, 0.3, 0.8, 0.2, 0.4, 0.5, 0.6, 0.7],
        )
        .unwrap();
        let mut previous = 0.0;
        for k in 1..=3 {
            let recall = recall_at_k(&similarity, k).unwrap();
            assert!(recall >= previous);
            previous = recall;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn ties_resolve_to_the_lower_column_index() {
        // Row 0 ties its own column with column 1; index order must keep
        // column 0 inside the top-1 cut.
        let similarity = Tensor::from_vec(2, 2, vec![0.5, 0.5, 0.5, 0.5]).unwrap();
        assert_eq!(recall_at_k(&similarity, 1).unwrap(), 0.5);
    }

    #[test]
    fn k_larger_than_the_matrix_is_capped() {
        let similarity = Tensor::from_vec(2, 2, vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        assert_eq!(recall_at_k(&similarity, 50).unwrap(), 1.0);
    }

    #[test]
    fn non_square_matrices_are_rejected() {
        let similarity = Tensor::zeros(2, 3).unwrap();
        assert!(recall_at_k(&similarity, 1).is_err());
        assert!(recall_at_k(&identity(2), 0).is_err());
    }
}
