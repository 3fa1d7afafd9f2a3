// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Spatial localization scoring: consensus IoU and its AUC.
//!
//! Each similarity row is a 1-D signal over the validation set. The row is
//! upsampled into a square heatmap with bicubic interpolation; the
//! matching ground-truth row uses nearest-neighbour so its 0/1 entries
//! survive the resize. The binarisation threshold is the median of the
//! predicted map — adaptive per row, which keeps roughly half the pixels
//! positive regardless of the row's absolute similarity scale.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use av_tensor::Tensor;
use av_vision::heatmap::{
    mask_iou, median_threshold, threshold_mask, upsample_bicubic, upsample_nearest,
};

use crate::{AlignError, AlignResult};

/// Sample-id → semantic-label-set mapping backing the ground-truth map.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    entries: HashMap<String, HashSet<String>>,
}

impl LabelTable {
    /// Load the persisted JSON mapping (`{id: [labels..]}`), once per
    /// evaluation pass.
    pub fn load<P: AsRef<Path>>(path: P) -> AlignResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| AlignError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let raw: HashMap<String, Vec<String>> = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| AlignError::Serialization {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        Ok(Self::from_entries(raw))
    }

    /// Table built from in-memory entries.
    pub fn from_entries(entries: HashMap<String, Vec<String>>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(id, labels)| (id, labels.into_iter().collect()))
            .collect();
        Self { entries }
    }

    /// Label set for a sample id, when known.
    pub fn get(&self, id: &str) -> Option<&HashSet<String>> {
        self.entries.get(id)
    }

    /// Number of labelled ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the co-occurrence ground truth over the validation ordering:
/// `gt[i][j] = 1` iff samples i and j share at least one label. The map is
/// symmetric and its diagonal is always 1; ids missing from the table
/// contribute nothing beyond their diagonal entry.
pub fn co_occurrence_map(ids: &[String], table: &LabelTable) -> AlignResult<Tensor> {
    if ids.is_empty() {
        return Err(AlignError::InvalidArgument(
            "co-occurrence map needs at least one id".to_string(),
        ));
    }
    let n = ids.len();
    let sets: Vec<Option<&HashSet<String>>> = ids.iter().map(|id| table.get(id)).collect();
    let mut gt = Tensor::zeros(n, n)?;
    let data = gt.data_mut();
    for i in 0..n {
        data[i * n + i] = 1.0;
        let Some(left) = sets[i] else { continue };
        for j in (i + 1)..n {
            let Some(right) = sets[j] else { continue };
            if !left.is_disjoint(right) {
                data[i * n + j] = 1.0;
                data[j * n + i] = 1.0;
            }
        }
    }
    Ok(gt)
}

/// Aggregate localization scores for one evaluation pass.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalizationReport {
    /// Mean consensus IoU over all rows.
    pub mean_ciou: f32,
    /// Area under the success-rate curve swept over cIoU thresholds
    /// `0, 0.05, …, 1.0`.
    pub auc: f32,
    /// Per-row cIoU scores in validation order.
    pub per_row: Vec<f32>,
}

/// Score every similarity row against the ground-truth map.
///
/// `side` is the square heatmap resolution both signals are upsampled to
/// (the original image grid, typically 224).
pub fn score_localization(
    similarity: &Tensor,
    ground_truth: &Tensor,
    side: usize,
) -> AlignResult<LocalizationReport> {
    if similarity.shape() != ground_truth.shape() {
        return Err(AlignError::Shape(format!(
            "similarity {:?} and ground truth {:?} disagree",
            similarity.shape(),
            ground_truth.shape()
        )));
    }
    if side == 0 {
        return Err(AlignError::InvalidArgument(
            "heatmap side must be > 0".to_string(),
        ));
    }

    let (rows, cols) = similarity.shape();
    let mut per_row = Vec::with_capacity(rows);
    for i in 0..rows {
        let pred_map = upsample_bicubic(similarity.row(i)?, (cols, 1), (side, side))?;
        let gt_map = upsample_nearest(ground_truth.row(i)?, (cols, 1), (side, side))?;
        let threshold = median_threshold(&pred_map)?;
        let pred_mask = threshold_mask(&pred_map, threshold);
        per_row.push(mask_iou(&pred_mask, &gt_map)?);
    }

    let mean_ciou = per_row.iter().sum::<f32>() / rows as f32;
    Ok(LocalizationReport {
        mean_ciou,
        auc: success_rate_auc(&per_row),
        per_row,
    })
}

/// Trapezoidal area under the curve of `fraction of rows with cIoU >= t`
/// as t sweeps `0, 0.05, …, 1.0`.
fn success_rate_auc(per_row: &[f32]) -> f32 {
    let total = per_row.len() as f32;
    let rates: Vec<f32> = (0..=20)
        .map(|step| {
            let threshold = step as f32 * 0.05;
            per_row.iter().filter(|&&ciou| ciou >= threshold).count() as f32 / total
        })
        .collect();
    let mut area = 0.0f32;
    for pair in rates.windows(2) {
        area += (pair[0] + pair[1]) * 0.5 * 0.05;
    }
    area
}
