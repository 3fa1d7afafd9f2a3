// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Visual-side primitives for AVAlign: CHW image tensors, the seedable
//! augmentation pipeline that produces perturbed training views, and the
//! heatmap utilities consumed by the localization evaluator.

pub mod heatmap;
pub mod image;
pub mod transforms;

use thiserror::Error;

pub use image::ImageTensor;
pub use transforms::{TransformOperation, TransformPipeline};

/// Errors surfaced by the vision crate.
#[derive(Debug, Error, PartialEq)]
pub enum VisionError {
    /// Raised when inputs have mismatched channel or spatial dimensions.
    #[error("shape mismatch: {0}")]
    Shape(String),
    /// Raised when an invalid parameter (probability, crop size, etc.) is
    /// provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type VisionResult<T> = std::result::Result<T, VisionError>;
