// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Temperature-scaled cross-modal contrastive objective.
//!
//! For a batch of B paired samples the logits are `(V · Aᵗ) / τ` and the
//! labels are the identity permutation: row i's correct column is i, which
//! encodes "sample i's image matches sample i's audio and nobody else's
//! in-batch". Extra positive views (a mined hard positive, an augmented
//! frame) each contribute an independent logit matrix against the same
//! audio batch; per-view losses are summed unweighted.

use av_tensor::Tensor;

use crate::similarity::similarity;
use crate::{AlignError, AlignResult};

/// Default softmax temperature for the objective.
pub const DEFAULT_TEMPERATURE: f32 = 0.07;

/// One visual view paired against an audio batch.
#[derive(Clone, Copy, Debug)]
pub struct ContrastiveView<'a> {
    /// Stable name used for logging and the loss breakdown.
    pub name: &'static str,
    /// Visual embeddings, `B×D`.
    pub visual: &'a Tensor,
    /// Audio embeddings, `B×D`. Hard-positive views pass the gathered
    /// audio rows matching their surviving frames.
    pub audio: &'a Tensor,
}

/// Per-view loss term.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewLoss {
    pub name: &'static str,
    pub loss: f32,
    /// Temperature-scaled logits, `B×B`, row-major.
    pub logits: Tensor,
    pub batch: usize,
}

/// Summed multi-view objective handed to the opaque backward hook.
#[derive(Clone, Debug, PartialEq)]
pub struct LossBundle {
    pub total: f32,
    pub views: Vec<ViewLoss>,
}

fn validate_temperature(temperature: f32) -> AlignResult<()> {
    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(AlignError::InvalidArgument(format!(
            "temperature must be > 0, got {temperature}"
        )));
    }
    Ok(())
}

fn validate_view(view: &ContrastiveView<'_>) -> AlignResult<usize> {
    let (visual_rows, visual_dim) = view.visual.shape();
    let (audio_rows, audio_dim) = view.audio.shape();
    if visual_rows != audio_rows {
        return Err(AlignError::Shape(format!(
            "view '{}' pairs {visual_rows} visual rows with {audio_rows} audio rows",
            view.name
        )));
    }
    if visual_dim != audio_dim {
        return Err(AlignError::Shape(format!(
            "view '{}' mixes embedding dims {visual_dim} and {audio_dim}",
            view.name
        )));
    }
    if visual_rows < 2 {
        return Err(AlignError::DegenerateBatch { batch: visual_rows });
    }
    Ok(visual_rows)
}

/// Row-wise cross-entropy of the scaled similarity matrix against identity
/// labels, for a single view.
pub fn contrastive_loss(view: ContrastiveView<'_>, temperature: f32) -> AlignResult<ViewLoss> {
    validate_temperature(temperature)?;
    let batch = validate_view(&view)?;

    let mut logits = similarity(view.visual, view.audio)?;
    for value in logits.data_mut() {
        *value /= temperature;
    }

    let mut loss = 0.0f64;
    for i in 0..batch {
        let row = logits.row(i)?;
        let max_logit = row.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let exp_sum: f64 = row.iter().map(|&v| f64::from(v - max_logit).exp()).sum();
        let log_prob = f64::from(row[i] - max_logit) - exp_sum.ln();
        loss -= log_prob;
    }
    loss /= batch as f64;

    Ok(ViewLoss {
        name: view.name,
        loss: loss as f32,
        logits,
        batch,
    })
}

/// Sum of independent per-view contrastive terms.
pub fn multiview_contrastive_loss(
    views: &[ContrastiveView<'_>],
    temperature: f32,
) -> AlignResult<LossBundle> {
    if views.is_empty() {
        return Err(AlignError::InvalidArgument(
            "at least one contrastive view is required".to_string(),
        ));
    }
    let mut total = 0.0f32;
    let mut terms = Vec::with_capacity(views.len());
    for view in views {
        let term = contrastive_loss(*view, temperature)?;
        total += term.loss;
        terms.push(term);
    }
    Ok(LossBundle {
        total,
        views: terms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orthonormal_batch(batch: usize, dim: usize, scale: f32) -> Tensor {
        Tensor::from_fn(batch, dim, |r, c| if r == c { scale } else { 0.0 }).unwrap()
    }

    #[test]
    fn identity_wiring_drives_the_loss_toward_zero() {
        // image[i] == audio[i], orthogonal across i. As the similarity scale
        // grows the softmax saturates on the diagonal and the loss vanishes.
        let mut previous = f32::INFINITY;
        for scale in [1.0f32, 2.0, 4.0] {
            let batch = orthonormal_batch(4, 8, scale);
            let term = contrastive_loss(
                ContrastiveView {
                    name: "paired",
                    visual: &batch,
                    audio: &batch,
                },
                1.0,
            )
            .unwrap();
            assert!(term.loss < previous);
            previous = term.loss;
        }
        assert!(previous < 1e-3);
    }

    #[test]
    fn temperature_sharpens_the_objective() {
        let batch = orthonormal_batch(4, 4, 1.0);
        let view = ContrastiveView {
            name: "paired",
            visual: &batch,
            audio: &batch,
        };
        let warm = contrastive_loss(view, 1.0).unwrap();
        let cold = contrastive_loss(view, DEFAULT_TEMPERATURE).unwrap();
        assert!(cold.loss < warm.loss);
    }

    #[test]
    fn degenerate_batches_are_rejected() {
        let single = Tensor::from_vec(1, 4, vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let err = contrastive_loss(
            ContrastiveView {
                name: "paired",
                visual: &single,
                audio: &single,
            },
            0.07,
        )
        .unwrap_err();
        assert!(matches!(err, AlignError::DegenerateBatch { batch: 1 }));
    }

    #[test]
    fn invalid_temperatures_are_rejected() {
        let batch = orthonormal_batch(2, 2, 1.0);
        let view = ContrastiveView {
            name: "paired",
            visual: &batch,
            audio: &batch,
        };
        assert!(contrastive_loss(view, 0.0).is_err());
        assert!(contrastive_loss(view, -0.5).is_err());
        assert!(contrastive_loss(view, f32::NAN).is_err());
    }

    #[test]
    fn mismatched_view_shapes_are_rejected() {
        let visual = orthonormal_batch(3, 4, 1.0);
        let audio = orthonormal_batch(2, 4, 1.0);
        let err = contrastive_loss(
            ContrastiveView {
                name: "hard_positive",
                visual: &visual,
                audio: &audio,
            },
            0.07,
        )
        .unwrap_err();
        assert!(matches!(err, AlignError::Shape(_)));
    }

    #[test]
    fn multiview_total_is_the_sum_of_its_terms() {
        let paired = orthonormal_batch(3, 6, 1.0);
        let shifted = Tensor::from_fn(3, 6, |r, c| if (r + 1) % 3 == c { 1.0 } else { 0.0 }).unwrap();
        let views = [
            ContrastiveView {
                name: "paired",
                visual: &paired,
                audio: &paired,
            },
            ContrastiveView {
                name: "augmented",
                visual: &shifted,
                audio: &paired,
            },
        ];
        let bundle = multiview_contrastive_loss(&views, 0.5).unwrap();
        assert_eq!(bundle.views.len(), 2);
        let expected: f32 = bundle.views.iter().map(|view| view.loss).sum();
        assert!((bundle.total - expected).abs() < 1e-6);
        // The misaligned view must cost strictly more than the aligned one.
        assert!(bundle.views[1].loss > bundle.views[0].loss);
    }

    #[test]
    fn logits_are_scaled_by_the_temperature() {
        let batch = orthonormal_batch(2, 2, 1.0);
        let term = contrastive_loss(
            ContrastiveView {
                name: "paired",
                visual: &batch,
                audio: &batch,
            },
            0.25,
        )
        .unwrap();
        assert_eq!(term.logits.data(), &[4.0, 0.0, 0.0, 4.0]);
    }
}
