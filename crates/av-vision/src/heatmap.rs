// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Heatmap resampling and masking helpers for localization scoring.
//!
//! Predicted similarity rows are upsampled with bicubic interpolation;
//! ground-truth rows use nearest-neighbour so their 0/1 semantics survive
//! the resize. Thresholding is adaptive per row: the cutoff is the median
//! of the predicted map, never a global constant.

use crate::{VisionError, VisionResult};

/// Cubic convolution coefficient matching the common bicubic kernel.
const BICUBIC_A: f32 = -0.75;

fn validate_resample(
    src: &[f32],
    src_shape: (usize, usize),
    dst_shape: (usize, usize),
) -> VisionResult<()> {
    let (src_h, src_w) = src_shape;
    let (dst_h, dst_w) = dst_shape;
    if src_h == 0 || src_w == 0 || dst_h == 0 || dst_w == 0 {
        return Err(VisionError::InvalidArgument(format!(
            "resample shapes must be > 0, got {src_shape:?} -> {dst_shape:?}"
        )));
    }
    if src.len() != src_h * src_w {
        return Err(VisionError::Shape(format!(
            "source length {} does not match {src_h}x{src_w}",
            src.len()
        )));
    }
    Ok(())
}

/// Nearest-neighbour upsampling. Binary inputs stay binary.
pub fn upsample_nearest(
    src: &[f32],
    src_shape: (usize, usize),
    dst_shape: (usize, usize),
) -> VisionResult<Vec<f32>> {
    validate_resample(src, src_shape, dst_shape)?;
    let (src_h, src_w) = src_shape;
    let (dst_h, dst_w) = dst_shape;
    let scale_y = src_h as f32 / dst_h as f32;
    let scale_x = src_w as f32 / dst_w as f32;
    let mut dst = Vec::with_capacity(dst_h * dst_w);
    for oy in 0..dst_h {
        let sy = ((oy as f32 * scale_y) as usize).min(src_h - 1);
        for ox in 0..dst_w {
            let sx = ((ox as f32 * scale_x) as usize).min(src_w - 1);
            dst.push(src[sy * src_w + sx]);
        }
    }
    Ok(dst)
}

fn cubic_weight(t: f32) -> f32 {
    let t = t.abs();
    if t <= 1.0 {
        ((BICUBIC_A + 2.0) * t - (BICUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        BICUBIC_A * (((t - 5.0) * t + 8.0) * t - 4.0)
    } else {
        0.0
    }
}

/// Bicubic upsampling with half-pixel centre alignment. Border samples are
/// clamped to the nearest valid source index.
pub fn upsample_bicubic(
    src: &[f32],
    src_shape: (usize, usize),
    dst_shape: (usize, usize),
) -> VisionResult<Vec<f32>> {
    validate_resample(src, src_shape, dst_shape)?;
    let (src_h, src_w) = src_shape;
    let (dst_h, dst_w) = dst_shape;
    let scale_y = src_h as f32 / dst_h as f32;
    let scale_x = src_w as f32 / dst_w as f32;
    let mut dst = Vec::with_capacity(dst_h * dst_w);
    for oy in 0..dst_h {
        let sy = (oy as f32 + 0.5) * scale_y - 0.5;
        let base_y = sy.floor();
        let fy = sy - base_y;
        for ox in 0..dst_w {
            let sx = (ox as f32 + 0.5) * scale_x - 0.5;
            let base_x = sx.floor();
            let fx = sx - base_x;
            let mut value = 0.0f32;
            for ky in -1i64..=2 {
                let wy = cubic_weight(ky as f32 - fy);
                if wy == 0.0 {
                    continue;
                }
                let y = (base_y as i64 + ky).clamp(0, src_h as i64 - 1) as usize;
                for kx in -1i64..=2 {
                    let wx = cubic_weight(kx as f32 - fx);
                    if wx == 0.0 {
                        continue;
                    }
                    let x = (base_x as i64 + kx).clamp(0, src_w as i64 - 1) as usize;
                    value += wy * wx * src[y * src_w + x];
                }
            }
            dst.push(value);
        }
    }
    Ok(dst)
}

/// The value at the 50th percentile of the map, i.e. `sorted[len / 2]`.
pub fn median_threshold(values: &[f32]) -> VisionResult<f32> {
    if values.is_empty() {
        return Err(VisionError::InvalidArgument(
            "median of an empty map is undefined".to_string(),
        ));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    Ok(sorted[sorted.len() / 2])
}

/// Binary mask selecting values `>= threshold`.
pub fn threshold_mask(values: &[f32], threshold: f32) -> Vec<f32> {
    values
        .iter()
        .map(|&value| if value >= threshold { 1.0 } else { 0.0 })
        .collect()
}

/// Intersection-over-union of two binary masks. Both masks empty counts as
/// perfect agreement.
pub fn mask_iou(pred: &[f32], gt: &[f32]) -> VisionResult<f32> {
    if pred.len() != gt.len() {
        return Err(VisionError::Shape(format!(
            "mask lengths disagree: {} vs {}",
            pred.len(),
            gt.len()
        )));
    }
    let mut intersection = 0usize;
    let mut union = 0usize;
    for (&p, &g) in pred.iter().zip(gt.iter()) {
        let p = p >= 0.5;
        let g = g >= 0.5;
        if p && g {
            intersection += 1;
        }
        if p || g {
            union += 1;
        }
    }
    if union == 0 {
        return Ok(1.0);
    }
    Ok(intersection as f32 / union as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_preserves_binary_values() {
        let src = vec![0.0, 1.0, 1.0, 0.0];
        let dst = upsample_nearest(&src, (4, 1), (8, 8)).unwrap();
        assert!(dst.iter().all(|v| *v == 0.0 || *v == 1.0));
        // Top quarter comes from the first source entry, second from the next.
        assert_eq!(dst[0], 0.0);
        assert_eq!(dst[2 * 8], 1.0);
        assert_eq!(dst[4 * 8], 1.0);
        assert_eq!(dst[6 * 8], 0.0);
    }

    #[test]
    fn bicubic_keeps_constant_maps_constant() {
        let src = vec![0.4; 6];
        let dst = upsample_bicubic(&src, (6, 1), (12, 12)).unwrap();
        for value in dst {
            assert!((value - 0.4).abs() < 1e-5);
        }
    }

    #[test]
    fn bicubic_at_identity_scale_reproduces_the_input() {
        let src = vec![0.0, 1.0, 2.0, 3.0];
        let dst = upsample_bicubic(&src, (2, 2), (2, 2)).unwrap();
        for (d, s) in dst.iter().zip(src.iter()) {
            assert!((d - s).abs() < 1e-5);
        }
    }

    #[test]
    fn column_signal_upsamples_to_a_square_map() {
        let src = vec![0.0, 0.5, 1.0];
        let dst = upsample_bicubic(&src, (3, 1), (9, 9)).unwrap();
        assert_eq!(dst.len(), 81);
        // Rows are constant because the source has a single column.
        for row in dst.chunks(9) {
            for value in row {
                assert!((value - row[0]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn median_threshold_picks_the_upper_middle_value() {
        let values = vec![3.0, 0.0, 2.0, 1.0];
        assert_eq!(median_threshold(&values).unwrap(), 2.0);
        assert!(median_threshold(&[]).is_err());
    }

    #[test]
    fn threshold_mask_is_inclusive() {
        let mask = threshold_mask(&[0.1, 0.5, 0.9], 0.5);
        assert_eq!(mask, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn mask_iou_identical_and_disjoint() {
        let left = vec![1.0, 1.0, 0.0, 0.0];
        let right = vec![0.0, 0.0, 1.0, 1.0];
        assert_eq!(mask_iou(&left, &left).unwrap(), 1.0);
        assert_eq!(mask_iou(&left, &right).unwrap(), 0.0);
        assert_eq!(mask_iou(&[0.0, 0.0], &[0.0, 0.0]).unwrap(), 1.0);
    }
}
