// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Hard-positive mining.
//!
//! A pre-computed nearest-neighbour index maps each training id to a
//! ranked list of alternate frame indices believed to depict the same
//! event. Per batch, every id present in the index draws one candidate
//! uniformly at random and the frame is re-fetched from the data source.
//! Ids missing from the index are treated as "no match" and skipped; the
//! sampler reports which rows survived so the caller can gather the
//! matching audio rows and keep both sides of the hard-positive matrix
//! aligned.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;

use av_vision::ImageTensor;

use crate::dataset::SampleSource;
use crate::{AlignError, AlignResult};

/// One index entry: the matched video and its ranked candidate frames.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub video_id: String,
    pub indices: Vec<usize>,
}

/// Read-only nearest-neighbour index keyed by sample id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HardPositiveIndex {
    entries: HashMap<String, IndexEntry>,
}

impl HardPositiveIndex {
    /// Load the persisted JSON index (`{id: {video_id, indices}}`). The
    /// index is loaded once per run and never mutated afterwards.
    pub fn load<P: AsRef<Path>>(path: P) -> AlignResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| AlignError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let entries: HashMap<String, IndexEntry> = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| AlignError::Serialization {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { entries })
    }

    /// Index built from in-memory entries; used by tests and tools.
    pub fn from_entries(entries: HashMap<String, IndexEntry>) -> Self {
        Self { entries }
    }

    /// Candidate entry for a sample id, when one exists.
    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    /// Number of indexed ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no id is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hard-positive frames for the rows of the active batch that matched.
#[derive(Clone, Debug)]
pub struct HardPositiveDraw {
    /// Re-fetched frames, one per surviving row, in row order.
    pub frames: Vec<ImageTensor>,
    /// Positions of the surviving rows within the original batch.
    pub rows: Vec<usize>,
}

/// Draws hard-positive frames for training batches.
#[derive(Debug)]
pub struct HardPositiveSampler {
    rng: StdRng,
}

impl HardPositiveSampler {
    /// Sampler with an optional explicit seed; otherwise the seed derives
    /// from the global determinism configuration.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: av_config::determinism::rng_from_optional(seed, "av-align/hard_positive_sampler"),
        }
    }

    /// Sample one candidate frame per indexed batch id.
    ///
    /// Candidates pointing outside the source and ids without an entry (or
    /// with an empty candidate list) are skipped. Returns `None` when
    /// fewer than two rows survive — the identity-label objective needs at
    /// least two — letting the caller drop the hard-positive term for the
    /// batch instead of building a misaligned matrix.
    pub fn sample(
        &mut self,
        ids: &[String],
        index: &HardPositiveIndex,
        source: &dyn SampleSource,
    ) -> AlignResult<Option<HardPositiveDraw>> {
        let mut frames = Vec::new();
        let mut rows = Vec::new();
        for (row, id) in ids.iter().enumerate() {
            let Some(entry) = index.get(id) else {
                continue;
            };
            if entry.indices.is_empty() {
                continue;
            }
            let choice = entry.indices[self.rng.gen_range(0..entry.indices.len())];
            if choice >= source.len() {
                tracing::debug!(id = %id, candidate = choice, "hard-positive candidate outside source");
                continue;
            }
            let sample = source.fetch(choice)?;
            frames.push(sample.visual);
            rows.push(row);
        }
        if rows.len() < 2 {
            return Ok(None);
        }
        Ok(Some(HardPositiveDraw { frames, rows }))
    }
}
