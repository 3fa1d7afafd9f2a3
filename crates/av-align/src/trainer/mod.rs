// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The epoch loop.
//!
//! Each batch: fetch, embed, optionally mine a hard-positive view and
//! build an augmented view, reduce the summed contrastive objective, and
//! hand it to the opaque backward hook. Each epoch: run the configured
//! evaluator over the validation set, export scalars, and persist
//! checkpoints (rank 0 only). The loop is synchronous within a worker;
//! the epoch boundary, with a freshly durable checkpoint, is the unit of
//! safe interruption.

mod collective;
mod device;

pub use collective::CollectiveError;
pub use device::{CpuDevice, DistributedDevice, MetricReduce, TrainingDevice};

use std::time::Instant;

use rand::rngs::StdRng;
use rand::Rng;

use av_tensor::Tensor;
use av_vision::transforms::{TransformOperation, TransformPipeline};

use crate::checkpoint::{self, CheckpointRecord};
use crate::config::RunConfig;
use crate::contrastive::{multiview_contrastive_loss, ContrastiveView};
use crate::dataset::{gather_batch, shuffled_indices, SampleBatch, SampleSource};
use crate::evaluator::{
    co_occurrence_map, recall_at_k, score_localization, EvalMode, EvalSummary, LabelTable,
};
use crate::meter::{AverageMeter, ProgressReporter};
use crate::metrics::{EpochMetrics, TensorBoardExporter};
use crate::mining::{HardPositiveIndex, HardPositiveSampler};
use crate::model::{AudioVisualEmbedder, EmbedderState};
use crate::similarity::tiled_similarity;
use crate::{AlignError, AlignResult};

/// Per-epoch training statistics, post metric aggregation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochStats {
    pub mean_loss: f32,
    pub batches: usize,
    pub batch_time: f32,
    pub data_time: f32,
}

/// Outcome of a completed run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainReport {
    /// Epoch index the loop started from (non-zero after a resume).
    pub start_epoch: usize,
    /// Epochs executed by this invocation.
    pub epochs_run: usize,
    /// Best evaluation metric across the whole run, resumes included.
    pub best_metric: f32,
    /// Evaluation outcome of the final epoch; `None` when the resume
    /// point already satisfied the configured epoch count.
    pub final_eval: Option<EvalSummary>,
}

/// Default augmentation prototype: flips, a bounded translate, and
/// occasional grayscale, all shape preserving so augmented frames batch
/// with the unperturbed ones.
pub fn standard_augmentation(seed: u64) -> TransformPipeline {
    let mut pipeline = TransformPipeline::with_seed(seed);
    let ops = [
        TransformOperation::RandomHorizontalFlip(0.5),
        TransformOperation::RandomVerticalFlip(0.5),
        TransformOperation::RandomTranslate {
            horizontal: 0.2,
            vertical: 0.2,
        },
        TransformOperation::RandomGrayscale(0.2),
    ];
    for op in ops {
        pipeline
            .add(op)
            .expect("standard augmentation parameters are valid");
    }
    pipeline
}

/// Drives training and evaluation for one worker.
pub struct Trainer<'a, M: AudioVisualEmbedder> {
    model: &'a mut M,
    device: &'a dyn TrainingDevice,
    config: RunConfig,
    index: Option<HardPositiveIndex>,
    augmentation: Option<TransformPipeline>,
    exporter: Option<TensorBoardExporter>,
    sampler: HardPositiveSampler,
    rng: StdRng,
}

impl<'a, M: AudioVisualEmbedder> Trainer<'a, M> {
    /// Validates the configuration, loads the hard-positive index when
    /// configured, and prepares the default augmentation prototype.
    pub fn new(
        model: &'a mut M,
        device: &'a dyn TrainingDevice,
        config: RunConfig,
    ) -> AlignResult<Self> {
        config.validate()?;
        let index = config
            .hard_positive_index
            .as_deref()
            .map(HardPositiveIndex::load)
            .transpose()?;
        let mut rng = av_config::determinism::rng_from_optional(config.seed, "av-align/trainer");
        let sampler = HardPositiveSampler::new(Some(rng.gen()));
        let augmentation = config.augment.then(|| standard_augmentation(rng.gen()));
        Ok(Self {
            model,
            device,
            config,
            index,
            augmentation,
            exporter: None,
            sampler,
            rng,
        })
    }

    /// Replace the augmentation prototype (or disable it with `None`).
    pub fn with_augmentation(mut self, pipeline: Option<TransformPipeline>) -> Self {
        self.augmentation = pipeline;
        self
    }

    /// Attach a TensorBoard exporter for per-epoch scalars.
    pub fn with_exporter(mut self, exporter: TensorBoardExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Run the full loop: resume from `latest` when present, then train
    /// and evaluate epoch by epoch until the configured epoch count.
    pub fn run(
        &mut self,
        train_source: &dyn SampleSource,
        val_source: &dyn SampleSource,
    ) -> AlignResult<TrainReport> {
        std::fs::create_dir_all(&self.config.run_dir).map_err(|err| AlignError::Io {
            path: self.config.run_dir.display().to_string(),
            message: err.to_string(),
        })?;

        let (start_epoch, mut best_metric) = self.resume()?;
        let mut epochs_run = 0usize;
        let mut final_eval = None;

        for epoch in start_epoch..self.config.epochs {
            let stats = self.train_one_epoch(train_source, epoch)?;
            let eval = self.evaluate(val_source)?;
            let metric = eval.selection_metric();
            let improved = metric >= best_metric;
            if improved {
                best_metric = metric;
            }

            if let Some(exporter) = &self.exporter {
                exporter.log_epoch(&EpochMetrics {
                    epoch,
                    mean_loss: stats.mean_loss,
                    batches: stats.batches,
                    batch_time: stats.batch_time,
                    data_time: stats.data_time,
                    eval,
                });
            }

            if self.device.rank() == 0 {
                self.save_checkpoints(epoch, best_metric, improved)?;
            }
            tracing::info!(
                epoch,
                mean_loss = stats.mean_loss,
                metric,
                best_metric,
                "epoch complete"
            );

            epochs_run += 1;
            final_eval = Some(eval);
        }

        if let Some(exporter) = &self.exporter {
            exporter.flush();
        }

        Ok(TrainReport {
            start_epoch,
            epochs_run,
            best_metric,
            final_eval,
        })
    }

    /// Restore `(start_epoch, best_metric)` from `latest` when the run
    /// directory holds one. Corrupt checkpoints are fatal.
    fn resume(&mut self) -> AlignResult<(usize, f32)> {
        let latest = checkpoint::latest_path(&self.config.run_dir);
        if !latest.exists() {
            return Ok((0, f32::NEG_INFINITY));
        }
        let record = checkpoint::load(&latest)?;
        self.model.load_state(&EmbedderState {
            model: record.model,
            optimizer: record.optimizer,
        })?;
        tracing::info!(
            epoch = record.epoch,
            best_metric = record.best_metric,
            path = %latest.display(),
            "resumed from checkpoint"
        );
        Ok((record.epoch, record.best_metric))
    }

    fn save_checkpoints(&self, epoch: usize, best_metric: f32, improved: bool) -> AlignResult<()> {
        let state = self.model.state()?;
        let record = CheckpointRecord {
            model: state.model,
            optimizer: state.optimizer,
            epoch: epoch + 1,
            best_metric,
        };
        checkpoint::save(&record, &checkpoint::latest_path(&self.config.run_dir))?;
        if improved {
            checkpoint::save(&record, &checkpoint::best_path(&self.config.run_dir))?;
        }
        Ok(())
    }

    fn train_one_epoch(
        &mut self,
        source: &dyn SampleSource,
        epoch: usize,
    ) -> AlignResult<EpochStats> {
        if source.is_empty() {
            return Err(AlignError::InvalidArgument(
                "training source is empty".to_string(),
            ));
        }

        let mut loss_meter = AverageMeter::new("Loss");
        let mut batch_time = AverageMeter::new("Time");
        let mut data_time = AverageMeter::new("Data");
        loss_meter.reset();
        batch_time.reset();
        data_time.reset();

        let order = shuffled_indices(source.len(), &mut self.rng);
        let chunks: Vec<&[usize]> = order
            .chunks(self.config.batch_size)
            .filter(|chunk| chunk.len() >= 2)
            .collect();
        if chunks.is_empty() {
            return Err(AlignError::DegenerateBatch {
                batch: source.len(),
            });
        }

        let reporter = ProgressReporter::new(
            format!("Epoch: [{epoch}]"),
            chunks.len(),
            self.device.rank() == 0,
        );

        let mut end = Instant::now();
        for (i, chunk) in chunks.iter().enumerate() {
            let batch = gather_batch(source, chunk)?;
            data_time.update(end.elapsed().as_secs_f32(), 1);

            let (visual_features, audio_features) =
                self.model.extract_features(&batch.visuals, &batch.spectrograms)?;
            let visual = visual_features.flatten()?;
            let audio = audio_features.flatten()?;
            if visual.rows() != batch.len() || audio.rows() != batch.len() {
                return Err(AlignError::Shape(format!(
                    "model returned {}x{} embeddings for a batch of {}",
                    visual.rows(),
                    audio.rows(),
                    batch.len()
                )));
            }

            let hard_positive = self.mine_hard_positives(source, &batch, &audio)?;
            let augmented = self.augment_view(&batch)?;

            let mut views = vec![ContrastiveView {
                name: "paired",
                visual: &visual,
                audio: &audio,
            }];
            if let Some((hp_visual, hp_audio)) = &hard_positive {
                views.push(ContrastiveView {
                    name: "hard_positive",
                    visual: hp_visual,
                    audio: hp_audio,
                });
            }
            if let Some(aug_visual) = &augmented {
                views.push(ContrastiveView {
                    name: "augmented",
                    visual: aug_visual,
                    audio: &audio,
                });
            }

            let bundle = multiview_contrastive_loss(&views, self.config.temperature)?;
            self.model.backward(&bundle, self.device)?;

            loss_meter.update(bundle.total, batch.len());
            batch_time.update(end.elapsed().as_secs_f32(), 1);
            end = Instant::now();

            if reporter.is_display_batch(i, self.config.print_freq) {
                reporter.display(i, &[&batch_time, &data_time, &loss_meter]);
            }
        }

        let mut aggregated = [loss_meter.average().unwrap_or(0.0)];
        self.device
            .aggregate_metrics(&mut aggregated, MetricReduce::Mean)?;

        Ok(EpochStats {
            mean_loss: aggregated[0],
            batches: chunks.len(),
            batch_time: batch_time.average().unwrap_or(0.0),
            data_time: data_time.average().unwrap_or(0.0),
        })
    }

    /// Draw hard-positive frames for the batch and embed them against the
    /// matching audio rows. Returns `None` when mining is disabled or too
    /// few rows survive; shape agreement between the surviving sides is
    /// validated before the loss ever sees them.
    fn mine_hard_positives(
        &mut self,
        source: &dyn SampleSource,
        batch: &SampleBatch,
        audio: &Tensor,
    ) -> AlignResult<Option<(Tensor, Tensor)>> {
        let Some(index) = &self.index else {
            return Ok(None);
        };
        let Some(draw) = self.sampler.sample(&batch.ids, index, source)? else {
            return Ok(None);
        };
        let spectrograms: Vec<Tensor> = draw
            .rows
            .iter()
            .map(|&row| batch.spectrograms[row].clone())
            .collect();
        let (features, _) = self.model.extract_features(&draw.frames, &spectrograms)?;
        let hp_visual = features.flatten()?;
        let hp_audio = audio.gather_rows(&draw.rows)?;
        if hp_visual.rows() != hp_audio.rows() {
            return Err(AlignError::Shape(format!(
                "hard-positive views misaligned: {} frames vs {} audio rows",
                hp_visual.rows(),
                hp_audio.rows()
            )));
        }
        Ok(Some((hp_visual, hp_audio)))
    }

    /// Apply a per-batch reseeded copy of the augmentation prototype and
    /// embed the perturbed frames against the original audio.
    fn augment_view(&mut self, batch: &SampleBatch) -> AlignResult<Option<Tensor>> {
        let Some(prototype) = &self.augmentation else {
            return Ok(None);
        };
        let mut pipeline = prototype.reseeded(self.rng.gen());
        let mut frames = Vec::with_capacity(batch.len());
        for frame in &batch.visuals {
            let mut view = frame.clone();
            pipeline.apply(&mut view)?;
            frames.push(view);
        }
        let (features, _) = self.model.extract_features(&frames, &batch.spectrograms)?;
        Ok(Some(features.flatten()?))
    }

    /// Read-only evaluation pass: collect every validation embedding,
    /// build the full similarity matrix through the tiled engine, and
    /// score it under the configured mode.
    fn evaluate(&mut self, source: &dyn SampleSource) -> AlignResult<EvalSummary> {
        if source.is_empty() {
            return Err(AlignError::InvalidArgument(
                "validation source is empty".to_string(),
            ));
        }

        let indices: Vec<usize> = (0..source.len()).collect();
        let mut visual_parts = Vec::new();
        let mut audio_parts = Vec::new();
        let mut ids = Vec::with_capacity(source.len());
        for chunk in indices.chunks(self.config.batch_size) {
            let batch = gather_batch(source, chunk)?;
            let (visual_features, audio_features) =
                self.model.extract_features(&batch.visuals, &batch.spectrograms)?;
            visual_parts.push(visual_features.flatten()?);
            audio_parts.push(audio_features.flatten()?);
            ids.extend(batch.ids);
        }
        let visual = Tensor::cat_rows(&visual_parts)?;
        let audio = Tensor::cat_rows(&audio_parts)?;

        let similarity =
            tiled_similarity(&visual, &audio, self.config.similarity_block_size())?;

        match self.config.eval {
            EvalMode::Retrieval => {
                let recall = recall_at_k(&similarity, self.config.recall_k)?;
                Ok(EvalSummary::Retrieval {
                    recall,
                    k: self.config.recall_k,
                })
            }
            EvalMode::Localization => {
                let label_path = self.config.label_file.as_deref().ok_or_else(|| {
                    AlignError::InvalidArgument(
                        "localization evaluation requires label_file".to_string(),
                    )
                })?;
                let table = LabelTable::load(label_path)?;
                let ground_truth = co_occurrence_map(&ids, &table)?;
                let report =
                    score_localization(&similarity, &ground_truth, self.config.heatmap_side)?;
                Ok(EvalSummary::Localization {
                    ciou: report.mean_ciou,
                    auc: report.auc,
                })
            }
        }
    }
}
