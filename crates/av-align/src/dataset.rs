// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The data-source boundary.
//!
//! Decoding lives outside the core: a source only has to expose its length
//! and random access by integer index. Sequential epoch iteration is
//! shuffled index order chunked into batches; hard-positive mining
//! re-fetches individual frames through the same `fetch` entry point.

use av_tensor::Tensor;
use av_vision::ImageTensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::{AlignError, AlignResult};

/// One decoded training/evaluation item.
#[derive(Clone, Debug)]
pub struct Sample {
    pub visual: ImageTensor,
    /// Audio spectrogram, `bins×frames`.
    pub spectrogram: Tensor,
    /// Raw waveform when the source carries one; a placeholder otherwise.
    pub raw_audio: Option<Vec<f32>>,
    pub id: String,
    /// Semantic labels when the source carries them; empty otherwise.
    pub labels: Vec<String>,
}

/// Random-access source of decoded samples.
pub trait SampleSource {
    /// Number of items in the source.
    fn len(&self) -> usize;

    /// True when the source holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch one item by index. Mining relies on this being cheap and
    /// side-effect free.
    fn fetch(&self, index: usize) -> AlignResult<Sample>;
}

/// Column-wise view over a fetched batch.
#[derive(Clone, Debug)]
pub struct SampleBatch {
    pub visuals: Vec<ImageTensor>,
    pub spectrograms: Vec<Tensor>,
    pub ids: Vec<String>,
    pub labels: Vec<Vec<String>>,
}

impl SampleBatch {
    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Fetch the given indices in order and split them into columns.
pub fn gather_batch(source: &dyn SampleSource, indices: &[usize]) -> AlignResult<SampleBatch> {
    if indices.is_empty() {
        return Err(AlignError::InvalidArgument(
            "cannot gather an empty batch".to_string(),
        ));
    }
    let mut visuals = Vec::with_capacity(indices.len());
    let mut spectrograms = Vec::with_capacity(indices.len());
    let mut ids = Vec::with_capacity(indices.len());
    let mut labels = Vec::with_capacity(indices.len());
    for &index in indices {
        let sample = source.fetch(index)?;
        visuals.push(sample.visual);
        spectrograms.push(sample.spectrogram);
        ids.push(sample.id);
        labels.push(sample.labels);
    }
    Ok(SampleBatch {
        visuals,
        spectrograms,
        ids,
        labels,
    })
}

/// Shuffled index order for one training epoch.
pub fn shuffled_indices(len: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
}

/// Deterministic in-memory source used by tests and the demo binary.
///
/// Sample content is a pure function of the index, so two sources built
/// with the same parameters agree element for element.
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    len: usize,
    image_side: usize,
    spec_bins: usize,
    spec_frames: usize,
    categories: usize,
}

impl SyntheticSource {
    pub fn new(
        len: usize,
        image_side: usize,
        spec_bins: usize,
        spec_frames: usize,
        categories: usize,
    ) -> AlignResult<Self> {
        if len == 0 || image_side == 0 || spec_bins == 0 || spec_frames == 0 || categories == 0 {
            return Err(AlignError::InvalidArgument(
                "synthetic source dimensions must be > 0".to_string(),
            ));
        }
        Ok(Self {
            len,
            image_side,
            spec_bins,
            spec_frames,
            categories,
        })
    }

    fn category(&self, index: usize) -> usize {
        index % self.categories
    }
}

impl SampleSource for SyntheticSource {
    fn len(&self) -> usize {
        self.len
    }

    fn fetch(&self, index: usize) -> AlignResult<Sample> {
        if index >= self.len {
            return Err(AlignError::InvalidArgument(format!(
                "sample index {index} outside source of length {}",
                self.len
            )));
        }
        let side = self.image_side;
        let category = self.category(index);
        let visual_data: Vec<f32> = (0..3 * side * side)
            .map(|k| (((index * 31 + k * 7 + category * 13) % 97) as f32) / 97.0)
            .collect();
        let visual = ImageTensor::new(3, side, side, visual_data)?;
        let spectrogram = Tensor::from_fn(self.spec_bins, self.spec_frames, |r, c| {
            (((index * 17 + r * 5 + c * 3 + category * 11) % 89) as f32) / 89.0
        })?;
        Ok(Sample {
            visual,
            spectrogram,
            raw_audio: None,
            id: format!("clip-{index:05}"),
            labels: vec![format!("category-{category}")],
        })
    }
}
