//! Contrastive audio-visual alignment.
//!
//! AVAlign trains a two-tower embedding model so that matched image/audio
//! pairs score high dot-product similarity and mismatched pairs score low.
//! This crate owns the numeric core: the tiled similarity engine, the
//! multi-view contrastive objective with hard-positive mining and
//! augmentation, the localization (cIoU/AUC) and retrieval (Recall@K)
//! evaluators, and the epoch loop that stitches them together around an
//! opaque embedding network.

pub mod checkpoint;
pub mod config;
pub mod contrastive;
pub mod dataset;
pub mod evaluator;
pub mod meter;
pub mod metrics;
pub mod mining;
pub mod model;
pub mod similarity;
pub mod trainer;

use av_tensor::TensorError;
use av_vision::VisionError;
use thiserror::Error;

use trainer::CollectiveError;

/// Errors surfaced by the alignment core.
#[derive(Debug, Error)]
pub enum AlignError {
    /// Inputs have mismatched batch or feature dimensions.
    #[error("shape mismatch: {0}")]
    Shape(String),
    /// An invalid parameter (temperature, block size, etc.) was provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The identity-label contrastive objective degenerates below two
    /// samples; such batches are a configuration error, never computed.
    #[error("degenerate batch of size {batch}; the contrastive objective needs at least 2 samples")]
    DegenerateBatch { batch: usize },
    /// Propagated tensor failure.
    #[error(transparent)]
    Tensor(#[from] TensorError),
    /// Propagated vision failure.
    #[error(transparent)]
    Vision(#[from] VisionError),
    /// Filesystem failure while persisting or restoring run artifacts.
    #[error("i/o failure on {path}: {message}")]
    Io { path: String, message: String },
    /// Encoding or decoding failure for run artifacts.
    #[error("serialization failure on {path}: {message}")]
    Serialization { path: String, message: String },
    /// Collective-communication failure; fatal, never retried here.
    #[error(transparent)]
    Collective(#[from] CollectiveError),
}

pub type AlignResult<T> = std::result::Result<T, AlignError>;
