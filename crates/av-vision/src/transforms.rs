// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Seedable augmentation pipeline producing perturbed visual views.
//!
//! The trainer reseeds a fresh pipeline per view from its own RNG so that
//! two views of the same frame receive independent perturbations while the
//! whole run stays reproducible under a fixed seed.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::image::ImageTensor;
use crate::{VisionError, VisionResult};

/// Crop the central window of the requested size.
#[derive(Clone, Debug, PartialEq)]
pub struct CenterCrop {
    height: usize,
    width: usize,
}

impl CenterCrop {
    pub fn new(height: usize, width: usize) -> VisionResult<Self> {
        if height == 0 || width == 0 {
            return Err(VisionError::InvalidArgument(
                "crop size must be > 0".to_string(),
            ));
        }
        Ok(Self { height, width })
    }

    fn apply(&self, image: &mut ImageTensor) -> VisionResult<()> {
        let (_, h, w) = image.shape();
        if self.height > h || self.width > w {
            return Err(VisionError::Shape(format!(
                "crop {}x{} larger than image {h}x{w}",
                self.height, self.width
            )));
        }
        let top = (h - self.height) / 2;
        let left = (w - self.width) / 2;
        image.crop(top, left, self.height, self.width)
    }
}

/// Crop a randomly positioned window of the requested size.
#[derive(Clone, Debug, PartialEq)]
pub struct RandomCrop {
    height: usize,
    width: usize,
}

impl RandomCrop {
    pub fn new(height: usize, width: usize) -> VisionResult<Self> {
        if height == 0 || width == 0 {
            return Err(VisionError::InvalidArgument(
                "crop size must be > 0".to_string(),
            ));
        }
        Ok(Self { height, width })
    }

    fn apply(&self, image: &mut ImageTensor, rng: &mut StdRng) -> VisionResult<()> {
        let (_, h, w) = image.shape();
        if self.height > h || self.width > w {
            return Err(VisionError::Shape(format!(
                "crop {}x{} larger than image {h}x{w}",
                self.height, self.width
            )));
        }
        let top = rng.gen_range(0..=h - self.height);
        let left = rng.gen_range(0..=w - self.width);
        image.crop(top, left, self.height, self.width)
    }
}

/// Per-channel normalisation `(value - mean) / std`.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalize {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Normalize {
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> VisionResult<Self> {
        if mean.is_empty() || mean.len() != std.len() {
            return Err(VisionError::InvalidArgument(format!(
                "normalize mean/std lengths disagree: {} vs {}",
                mean.len(),
                std.len()
            )));
        }
        if std.iter().any(|value| *value <= 0.0 || !value.is_finite()) {
            return Err(VisionError::InvalidArgument(
                "normalize std entries must be finite and > 0".to_string(),
            ));
        }
        Ok(Self { mean, std })
    }

    fn apply(&self, image: &mut ImageTensor) -> VisionResult<()> {
        let (channels, height, width) = image.shape();
        if channels != self.mean.len() {
            return Err(VisionError::Shape(format!(
                "normalize configured for {} channels, image has {channels}",
                self.mean.len()
            )));
        }
        let plane = height * width;
        let data = image.as_mut_slice();
        for channel in 0..channels {
            let mean = self.mean[channel];
            let std = self.std[channel];
            for value in &mut data[channel * plane..(channel + 1) * plane] {
                *value = (*value - mean) / std;
            }
        }
        Ok(())
    }
}

/// One step of the augmentation pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformOperation {
    CenterCrop(CenterCrop),
    RandomCrop(RandomCrop),
    /// Mirror along the vertical axis with the given probability.
    RandomHorizontalFlip(f32),
    /// Mirror along the horizontal axis with the given probability.
    RandomVerticalFlip(f32),
    /// Shift the content by up to the given fractions of width/height,
    /// filling vacated pixels with zero.
    RandomTranslate { horizontal: f32, vertical: f32 },
    /// Collapse channels to their mean with the given probability.
    RandomGrayscale(f32),
    Normalize(Normalize),
}

fn validate_probability(probability: f32, label: &str) -> VisionResult<()> {
    if !(0.0..=1.0).contains(&probability) || !probability.is_finite() {
        return Err(VisionError::InvalidArgument(format!(
            "{label} probability must be within [0, 1], got {probability}"
        )));
    }
    Ok(())
}

fn validate_fraction(fraction: f32, label: &str) -> VisionResult<()> {
    if !(0.0..=1.0).contains(&fraction) || !fraction.is_finite() {
        return Err(VisionError::InvalidArgument(format!(
            "{label} fraction must be within [0, 1], got {fraction}"
        )));
    }
    Ok(())
}

impl TransformOperation {
    fn validate(&self) -> VisionResult<()> {
        match self {
            TransformOperation::RandomHorizontalFlip(p) => {
                validate_probability(*p, "horizontal flip")
            }
            TransformOperation::RandomVerticalFlip(p) => validate_probability(*p, "vertical flip"),
            TransformOperation::RandomGrayscale(p) => validate_probability(*p, "grayscale"),
            TransformOperation::RandomTranslate {
                horizontal,
                vertical,
            } => {
                validate_fraction(*horizontal, "horizontal translate")?;
                validate_fraction(*vertical, "vertical translate")
            }
            _ => Ok(()),
        }
    }

    fn apply(&self, image: &mut ImageTensor, rng: &mut StdRng) -> VisionResult<()> {
        match self {
            TransformOperation::CenterCrop(crop) => crop.apply(image),
            TransformOperation::RandomCrop(crop) => crop.apply(image, rng),
            TransformOperation::RandomHorizontalFlip(probability) => {
                if rng.gen::<f32>() < *probability {
                    flip_horizontal(image);
                }
                Ok(())
            }
            TransformOperation::RandomVerticalFlip(probability) => {
                if rng.gen::<f32>() < *probability {
                    flip_vertical(image);
                }
                Ok(())
            }
            TransformOperation::RandomTranslate {
                horizontal,
                vertical,
            } => {
                let (_, height, width) = image.shape();
                let max_dx = (*horizontal * width as f32).floor() as i64;
                let max_dy = (*vertical * height as f32).floor() as i64;
                let dx = if max_dx > 0 {
                    rng.gen_range(-max_dx..=max_dx)
                } else {
                    0
                };
                let dy = if max_dy > 0 {
                    rng.gen_range(-max_dy..=max_dy)
                } else {
                    0
                };
                translate(image, dx, dy)
            }
            TransformOperation::RandomGrayscale(probability) => {
                if rng.gen::<f32>() < *probability {
                    grayscale(image);
                }
                Ok(())
            }
            TransformOperation::Normalize(normalize) => normalize.apply(image),
        }
    }
}

fn flip_horizontal(image: &mut ImageTensor) {
    let (channels, height, width) = image.shape();
    let data = image.as_mut_slice();
    for channel in 0..channels {
        for y in 0..height {
            let row = (channel * height + y) * width;
            data[row..row + width].reverse();
        }
    }
}

fn flip_vertical(image: &mut ImageTensor) {
    let (channels, height, width) = image.shape();
    let data = image.as_mut_slice();
    for channel in 0..channels {
        for y in 0..height / 2 {
            let top = (channel * height + y) * width;
            let bottom = (channel * height + height - 1 - y) * width;
            for x in 0..width {
                data.swap(top + x, bottom + x);
            }
        }
    }
}

fn translate(image: &mut ImageTensor, dx: i64, dy: i64) -> VisionResult<()> {
    let (channels, height, width) = image.shape();
    let mut shifted = vec![0.0f32; channels * height * width];
    for channel in 0..channels {
        for y in 0..height {
            let src_y = y as i64 - dy;
            if src_y < 0 || src_y >= height as i64 {
                continue;
            }
            for x in 0..width {
                let src_x = x as i64 - dx;
                if src_x < 0 || src_x >= width as i64 {
                    continue;
                }
                let dst = (channel * height + y) * width + x;
                let src = (channel * height + src_y as usize) * width + src_x as usize;
                shifted[dst] = image.as_slice()[src];
            }
        }
    }
    image.replace_data(shifted)
}

fn grayscale(image: &mut ImageTensor) {
    let (channels, height, width) = image.shape();
    if channels < 2 {
        return;
    }
    let plane = height * width;
    let data = image.as_mut_slice();
    for pixel in 0..plane {
        let mut sum = 0.0f32;
        for channel in 0..channels {
            sum += data[channel * plane + pixel];
        }
        let mean = sum / channels as f32;
        for channel in 0..channels {
            data[channel * plane + pixel] = mean;
        }
    }
}

/// Ordered, seedable sequence of transform operations.
#[derive(Debug)]
pub struct TransformPipeline {
    operations: Vec<TransformOperation>,
    rng: StdRng,
    seed: u64,
}

impl TransformPipeline {
    /// Pipeline with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            operations: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Pipeline seeded from the global determinism configuration.
    pub fn new(label: &str) -> Self {
        let seed = av_config::determinism::config().seed_for(label);
        Self::with_seed(seed)
    }

    /// Append a validated operation.
    pub fn add(&mut self, operation: TransformOperation) -> VisionResult<&mut Self> {
        operation.validate()?;
        self.operations.push(operation);
        Ok(self)
    }

    /// Operations in application order.
    pub fn operations(&self) -> &[TransformOperation] {
        &self.operations
    }

    /// Copy of this pipeline with a fresh RNG state. Used to derive
    /// independent per-view pipelines from one configured prototype.
    pub fn reseeded(&self, seed: u64) -> Self {
        Self {
            operations: self.operations.clone(),
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Seed this pipeline was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Apply every operation in order, mutating the image.
    pub fn apply(&mut self, image: &mut ImageTensor) -> VisionResult<()> {
        for operation in &self.operations {
            operation.apply(image, &mut self.rng)?;
        }
        Ok(())
    }
}
