// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The opaque model boundary.
//!
//! The embedding network is a capability, not a type hierarchy: the loop
//! only sees `extract_features`, a backward hook invoked once per batch,
//! and the state snapshot used for checkpointing. Networks that return
//! spatial feature maps are pooled to flat embeddings automatically.

use av_tensor::{FeatureMap, Tensor};
use av_vision::ImageTensor;

use crate::checkpoint::StateDict;
use crate::contrastive::LossBundle;
use crate::trainer::TrainingDevice;
use crate::AlignResult;

/// Embedding batch as produced by the network: already flat, or spatial
/// and awaiting pooling.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureBatch {
    /// `[B, D]` embeddings.
    Flat(Tensor),
    /// `[B, D, h, w]` feature maps; average-pooled before similarity.
    Spatial(FeatureMap),
}

impl FeatureBatch {
    /// Number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        match self {
            FeatureBatch::Flat(tensor) => tensor.rows(),
            FeatureBatch::Spatial(map) => map.batch(),
        }
    }

    /// Flat `[B, D]` embeddings, pooling the spatial form when needed.
    pub fn flatten(self) -> AlignResult<Tensor> {
        match self {
            FeatureBatch::Flat(tensor) => Ok(tensor),
            FeatureBatch::Spatial(map) => Ok(map.average_pool()?),
        }
    }
}

/// Model and optimizer parameter snapshots for checkpointing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbedderState {
    pub model: StateDict,
    pub optimizer: StateDict,
}

/// The two-tower embedding network plus its optimizer, treated as one
/// opaque capability.
pub trait AudioVisualEmbedder {
    /// Embed a batch of visual frames and spectrograms into the shared
    /// space. Both outputs must carry one row per input sample.
    ///
    /// Evaluation passes call this too; implementations must not change
    /// learnable state here.
    fn extract_features(
        &mut self,
        visuals: &[ImageTensor],
        spectrograms: &[Tensor],
    ) -> AlignResult<(FeatureBatch, FeatureBatch)>;

    /// Backpropagate the batch objective and step the optimizer. Invoked
    /// exactly once per training batch; gradient synchronisation across
    /// workers goes through `device`.
    fn backward(&mut self, bundle: &LossBundle, device: &dyn TrainingDevice) -> AlignResult<()>;

    /// Snapshot of the learnable state for checkpointing.
    fn state(&self) -> AlignResult<EmbedderState>;

    /// Restore a snapshot taken by [`AudioVisualEmbedder::state`].
    fn load_state(&mut self, state: &EmbedderState) -> AlignResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_batches_pass_through() {
        let tensor = Tensor::from_vec(2, 3, vec![1.0; 6]).unwrap();
        let batch = FeatureBatch::Flat(tensor.clone());
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.flatten().unwrap(), tensor);
    }

    #[test]
    fn spatial_batches_are_pooled_on_flatten() {
        let map = FeatureMap::new(2, 1, 2, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])
            .unwrap();
        let batch = FeatureBatch::Spatial(map);
        assert_eq!(batch.batch_size(), 2);
        let flat = batch.flatten().unwrap();
        assert_eq!(flat.shape(), (2, 1));
        assert_eq!(flat.data(), &[2.5, 6.5]);
    }
}
