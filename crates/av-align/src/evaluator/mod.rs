// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Validation-time scoring over the full similarity matrix.

pub mod localization;
pub mod retrieval;

use serde::Deserialize;

pub use localization::{co_occurrence_map, score_localization, LabelTable, LocalizationReport};
pub use retrieval::recall_at_k;

/// Which evaluator drives checkpoint selection for the run.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    /// Spatial localization: per-row cIoU and its AUC.
    #[default]
    Localization,
    /// Global retrieval: Recall@K against the diagonal ground truth.
    Retrieval,
}

/// Scalar outcome of one evaluation pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EvalSummary {
    Localization { ciou: f32, auc: f32 },
    Retrieval { recall: f32, k: usize },
}

impl EvalSummary {
    /// The scalar compared against the running best for checkpoint
    /// selection.
    pub fn selection_metric(&self) -> f32 {
        match self {
            EvalSummary::Localization { ciou, .. } => *ciou,
            EvalSummary::Retrieval { recall, .. } => *recall,
        }
    }
}
