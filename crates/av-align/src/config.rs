// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Run configuration, loaded from TOML and validated before the loop
//! starts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::contrastive::DEFAULT_TEMPERATURE;
use crate::evaluator::EvalMode;
use crate::{AlignError, AlignResult};

/// Validated configuration for one training run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Total number of epochs to train.
    pub epochs: usize,
    /// Training batch size; also the similarity tiling block size unless
    /// overridden.
    pub batch_size: usize,
    /// Directory receiving checkpoints and event files.
    pub run_dir: PathBuf,
    #[serde(default = "RunConfig::default_temperature")]
    pub temperature: f32,
    /// Block size for tiled evaluation similarity; defaults to the batch
    /// size.
    #[serde(default)]
    pub block_size: Option<usize>,
    #[serde(default)]
    pub eval: EvalMode,
    #[serde(default = "RunConfig::default_recall_k")]
    pub recall_k: usize,
    /// Square heatmap resolution for localization scoring.
    #[serde(default = "RunConfig::default_heatmap_side")]
    pub heatmap_side: usize,
    /// Progress line cadence in batches.
    #[serde(default = "RunConfig::default_print_freq")]
    pub print_freq: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Path to the hard-positive index; mining is disabled when absent.
    #[serde(default)]
    pub hard_positive_index: Option<PathBuf>,
    /// Path to the id → labels file required by localization evaluation.
    #[serde(default)]
    pub label_file: Option<PathBuf>,
    /// Whether the augmented view participates in the objective.
    #[serde(default = "RunConfig::default_augment")]
    pub augment: bool,
}

impl RunConfig {
    fn default_temperature() -> f32 {
        DEFAULT_TEMPERATURE
    }

    fn default_recall_k() -> usize {
        10
    }

    fn default_heatmap_side() -> usize {
        224
    }

    fn default_print_freq() -> usize {
        10
    }

    fn default_augment() -> bool {
        true
    }

    /// Effective tiling block size.
    pub fn similarity_block_size(&self) -> usize {
        self.block_size.unwrap_or(self.batch_size)
    }

    pub fn validate(&self) -> AlignResult<()> {
        if self.epochs == 0 {
            return Err(AlignError::InvalidArgument(
                "epochs must be > 0".to_string(),
            ));
        }
        if self.batch_size < 2 {
            return Err(AlignError::DegenerateBatch {
                batch: self.batch_size,
            });
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(AlignError::InvalidArgument(format!(
                "temperature must be > 0, got {}",
                self.temperature
            )));
        }
        if self.similarity_block_size() == 0 {
            return Err(AlignError::InvalidArgument(
                "block_size must be > 0".to_string(),
            ));
        }
        if self.recall_k == 0 {
            return Err(AlignError::InvalidArgument(
                "recall_k must be >= 1".to_string(),
            ));
        }
        if self.heatmap_side == 0 {
            return Err(AlignError::InvalidArgument(
                "heatmap_side must be > 0".to_string(),
            ));
        }
        if self.print_freq == 0 {
            return Err(AlignError::InvalidArgument(
                "print_freq must be > 0".to_string(),
            ));
        }
        if self.eval == EvalMode::Localization && self.label_file.is_none() {
            return Err(AlignError::InvalidArgument(
                "localization evaluation requires label_file".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(config: &str) -> AlignResult<Self> {
        let parsed: RunConfig = toml::from_str(config).map_err(|err| {
            AlignError::InvalidArgument(format!("failed to parse run config: {err}"))
        })?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> AlignResult<Self> {
        let data = fs::read_to_string(&path).map_err(|err| AlignError::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&data)
    }
}
