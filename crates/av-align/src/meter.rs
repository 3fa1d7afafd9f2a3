// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Running scalar meters and the per-epoch progress line.

use std::fmt;

/// Weighted running mean of a scalar observation (loss, timings).
///
/// The meter accumulates monotonically within one scope; callers reset it
/// explicitly at scope boundaries (epoch start) rather than relying on
/// reconstruction timing. `average` requires at least one update.
#[derive(Clone, Debug, PartialEq)]
pub struct AverageMeter {
    name: String,
    value: f32,
    sum: f64,
    count: f64,
}

impl AverageMeter {
    /// Fresh meter with zeroed state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 0.0,
            sum: 0.0,
            count: 0.0,
        }
    }

    /// Clear the accumulated state.
    pub fn reset(&mut self) {
        self.value = 0.0;
        self.sum = 0.0;
        self.count = 0.0;
    }

    /// Fold in an observation with the given weight (typically the batch
    /// size).
    pub fn update(&mut self, value: f32, weight: usize) {
        self.value = value;
        self.sum += f64::from(value) * weight as f64;
        self.count += weight as f64;
    }

    /// Meter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most recent observation.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Total weight folded in so far.
    pub fn count(&self) -> f64 {
        self.count
    }

    /// Weighted mean of the observations, or `None` before the first
    /// update.
    pub fn average(&self) -> Option<f32> {
        if self.count == 0.0 {
            None
        } else {
            Some((self.sum / self.count) as f32)
        }
    }
}

impl fmt::Display for AverageMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.3} ({:.3})",
            self.name,
            self.value,
            self.average().unwrap_or(0.0)
        )
    }
}

/// Formats periodic status lines for one worker's epoch loop.
///
/// Only rank 0 constructs an enabled reporter; the others keep the same
/// call shape with emission switched off, so log routing stays explicit
/// and testable. Emission cadence is the caller's decision and never
/// gates computation.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    prefix: String,
    total_batches: usize,
    enabled: bool,
}

impl ProgressReporter {
    pub fn new(prefix: impl Into<String>, total_batches: usize, enabled: bool) -> Self {
        Self {
            prefix: prefix.into(),
            total_batches,
            enabled,
        }
    }

    /// True on the cadence batches: every `frequency` batches and on the
    /// final batch.
    pub fn is_display_batch(&self, batch: usize, frequency: usize) -> bool {
        let frequency = frequency.max(1);
        batch % frequency == 0 || batch + 1 == self.total_batches
    }

    /// Render one status line: prefix, the batch position zero-padded to
    /// the digit width of the batch total, then each meter.
    pub fn render(&self, batch: usize, meters: &[&AverageMeter]) -> String {
        let width = self.total_batches.to_string().len();
        let mut line = format!(
            "{}[{:0width$}/{}]",
            self.prefix, batch, self.total_batches,
        );
        for meter in meters {
            line.push('\t');
            line.push_str(&meter.to_string());
        }
        line
    }

    /// Emit the rendered line when this worker narrates.
    pub fn display(&self, batch: usize, meters: &[&AverageMeter]) {
        if self.enabled {
            tracing::info!("{}", self.render(batch, meters));
        }
    }
}
