// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Epoch-boundary checkpoint persistence.
//!
//! `latest` is rewritten every epoch, `best` only when the epoch metric
//! reaches the running best. Records are written to a temporary file in
//! the target directory and renamed into place, so a crash mid-write
//! never corrupts the artifact a resume depends on.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use av_tensor::{Tensor, TensorResult};
use serde::{Deserialize, Serialize};

use crate::{AlignError, AlignResult};

/// File name of the always-overwritten checkpoint.
pub const LATEST_FILE: &str = "latest.ckpt";
/// File name of the best-metric checkpoint.
pub const BEST_FILE: &str = "best.ckpt";

/// Serialisable tensor snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl StoredTensor {
    pub fn from_tensor(tensor: &Tensor) -> StoredTensor {
        StoredTensor {
            rows: tensor.rows(),
            cols: tensor.cols(),
            data: tensor.data().to_vec(),
        }
    }

    pub fn into_tensor(self) -> TensorResult<Tensor> {
        Tensor::from_vec(self.rows, self.cols, self.data)
    }
}

/// Named parameter snapshot for one side of the run state.
pub type StateDict = HashMap<String, StoredTensor>;

/// The unit of crash recovery.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub model: StateDict,
    pub optimizer: StateDict,
    /// Epoch index the loop resumes from.
    pub epoch: usize,
    /// Best evaluation metric observed so far.
    pub best_metric: f32,
}

fn io_error(path: &Path, err: std::io::Error) -> AlignError {
    AlignError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn serde_error(path: &Path, err: impl ToString) -> AlignError {
    AlignError::Serialization {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Path of the `latest` artifact under a run directory.
pub fn latest_path(run_dir: &Path) -> PathBuf {
    run_dir.join(LATEST_FILE)
}

/// Path of the `best` artifact under a run directory.
pub fn best_path(run_dir: &Path) -> PathBuf {
    run_dir.join(BEST_FILE)
}

/// Atomically persist a record: write a sibling temp file, then rename it
/// over the destination.
pub fn save(record: &CheckpointRecord, path: &Path) -> AlignResult<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let file = File::create(&temp).map_err(|err| io_error(&temp, err))?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, record).map_err(|err| serde_error(&temp, err))?;
    std::fs::rename(&temp, path).map_err(|err| io_error(path, err))?;
    Ok(())
}

/// Restore a record. Corrupt or schema-mismatched files are fatal; no
/// partial resume is attempted.
pub fn load(path: &Path) -> AlignResult<CheckpointRecord> {
    let file = File::open(path).map_err(|err| io_error(path, err))?;
    let reader = BufReader::new(file);
    bincode::deserialize_from(reader).map_err(|err| serde_error(path, err))
}
