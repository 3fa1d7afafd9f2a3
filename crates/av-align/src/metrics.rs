// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Telemetry descriptors and the per-epoch TensorBoard export.
//!
//! Export is observability only: nothing in the loop reads these values
//! back, and a run without an exporter behaves identically.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use once_cell::sync::Lazy;
use tensorboard_rs::summary_writer::SummaryWriter;

use crate::evaluator::EvalSummary;

/// Units associated with a metric descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    /// Dimensionless scalar value (losses, ratios).
    Scalar,
    /// Raw count of occurrences, batches, or steps.
    Count,
    /// Wall-clock duration in seconds.
    Seconds,
}

/// Descriptor describing a metric emitted by the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Canonical metric name registered with the telemetry layer.
    pub name: &'static str,
    /// Unit associated with the metric value.
    pub unit: MetricUnit,
    /// Human readable description for dashboards and registries.
    pub description: &'static str,
}

/// Gauge value paired with a descriptor name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricValue {
    /// Name matching a registered descriptor.
    pub name: &'static str,
    /// Recorded value.
    pub value: f32,
    /// Unit associated with the reading.
    pub unit: MetricUnit,
}

static REGISTRY: Lazy<RwLock<Vec<MetricDescriptor>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Registers a collection of metric descriptors, ignoring duplicates.
pub fn register_descriptors(descriptors: &[MetricDescriptor]) {
    let mut registry = REGISTRY
        .write()
        .expect("metric registry write lock should not be poisoned");
    for descriptor in descriptors {
        if registry
            .iter()
            .all(|existing| existing.name != descriptor.name)
        {
            registry.push(*descriptor);
        }
    }
}

/// Returns the list of descriptors registered so far.
pub fn descriptors() -> Vec<MetricDescriptor> {
    REGISTRY
        .read()
        .expect("metric registry read lock should not be poisoned")
        .clone()
}

/// Canonical descriptors exposed by the alignment trainer.
pub const TRAINING_DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: "align.train.loss",
        unit: MetricUnit::Scalar,
        description: "Mean multi-view contrastive loss observed during the epoch.",
    },
    MetricDescriptor {
        name: "align.train.batches",
        unit: MetricUnit::Count,
        description: "Total number of batches processed in the epoch.",
    },
    MetricDescriptor {
        name: "align.train.batch_time",
        unit: MetricUnit::Seconds,
        description: "Mean wall-clock time spent per batch.",
    },
    MetricDescriptor {
        name: "align.train.data_time",
        unit: MetricUnit::Seconds,
        description: "Mean wall-clock time spent fetching batch data.",
    },
    MetricDescriptor {
        name: "align.val.metric",
        unit: MetricUnit::Scalar,
        description: "Evaluation metric driving checkpoint selection.",
    },
];

/// Convenience wrapper that registers the built-in trainer descriptors.
pub fn register_training_descriptors() {
    register_descriptors(TRAINING_DESCRIPTORS);
}

/// Metric payload summarising one training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub mean_loss: f32,
    pub batches: usize,
    pub batch_time: f32,
    pub data_time: f32,
    pub eval: EvalSummary,
}

impl EpochMetrics {
    /// Builds gauge values suitable for publishing to the telemetry layer.
    pub fn to_values(self) -> [MetricValue; 5] {
        [
            MetricValue {
                name: "align.train.loss",
                value: self.mean_loss,
                unit: MetricUnit::Scalar,
            },
            MetricValue {
                name: "align.train.batches",
                value: self.batches as f32,
                unit: MetricUnit::Count,
            },
            MetricValue {
                name: "align.train.batch_time",
                value: self.batch_time,
                unit: MetricUnit::Seconds,
            },
            MetricValue {
                name: "align.train.data_time",
                value: self.data_time,
                unit: MetricUnit::Seconds,
            },
            MetricValue {
                name: "align.val.metric",
                value: self.eval.selection_metric(),
                unit: MetricUnit::Scalar,
            },
        ]
    }
}

/// Writes per-epoch scalars to a TensorBoard event file.
pub struct TensorBoardExporter {
    writer: Mutex<SummaryWriter>,
}

impl TensorBoardExporter {
    pub fn new<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            writer: Mutex::new(SummaryWriter::new(logdir.as_ref())),
        }
    }

    /// Export one epoch's scalars.
    pub fn log_epoch(&self, metrics: &EpochMetrics) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.add_scalar("train/loss", metrics.mean_loss, metrics.epoch);
            writer.add_scalar("train/batch_time", metrics.batch_time, metrics.epoch);
            writer.add_scalar("train/data_time", metrics.data_time, metrics.epoch);
            match metrics.eval {
                EvalSummary::Localization { ciou, auc } => {
                    writer.add_scalar("val/ciou", ciou, metrics.epoch);
                    writer.add_scalar("val/auc", auc, metrics.epoch);
                }
                EvalSummary::Retrieval { recall, .. } => {
                    writer.add_scalar("val/recall", recall, metrics.epoch);
                }
            }
        }
    }

    /// Flush buffered events to disk.
    pub fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.flush();
        }
    }
}
