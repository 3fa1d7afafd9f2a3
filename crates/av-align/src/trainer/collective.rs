// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Minimal synchronous collective layer backing [`super::DistributedDevice`].
//!
//! Workers rendezvous under a named group and perform barrier-synchronised
//! all-reduce sums over `f32` buffers. The implementation is in-memory and
//! process-local: it exists so data-parallel semantics (startup barrier,
//! per-batch gradient averaging, metric aggregation) are exercised by the
//! test suite without a network backend. Failures are fatal to the caller;
//! the core never retries a collective.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, Weak};
use thiserror::Error;

static GROUPS: Lazy<Mutex<HashMap<String, Weak<GroupState>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug)]
struct GroupState {
    inner: Mutex<GroupInner>,
    condvar: Condvar,
}

impl GroupState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(GroupInner::default()),
            condvar: Condvar::new(),
        }
    }
}

#[derive(Debug, Default)]
struct GroupInner {
    expected: usize,
    arrived: usize,
    generation: u64,
    accumulator: Vec<f32>,
    result: Vec<f32>,
    ready_generation: u64,
    joined: HashSet<usize>,
    error: Option<CollectiveError>,
}

/// Errors produced by the in-memory collective.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CollectiveError {
    #[error("world size must be positive, got {0}")]
    EmptyWorldSize(usize),
    #[error("rank {rank} is out of bounds for world size {world_size}")]
    RankOutOfBounds { rank: usize, world_size: usize },
    #[error("worker group expects world size {expected}, got {got}")]
    WorldSizeMismatch { expected: usize, got: usize },
    #[error("rank {rank} already joined the worker group")]
    DuplicateRank { rank: usize },
    #[error("rank {rank} has not joined the worker group")]
    UnknownRank { rank: usize },
    #[error("buffer length mismatch: expected {expected}, got {got}")]
    BufferLengthMismatch { expected: usize, got: usize },
}

/// Handle representing one worker's membership in a group.
#[derive(Debug)]
pub struct WorkerSession {
    group: Arc<GroupState>,
    group_id: String,
    rank: usize,
    world_size: usize,
}

impl WorkerSession {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        {
            let mut state = self.group.inner.lock().unwrap();
            state.joined.remove(&self.rank);
            if state.joined.is_empty() {
                *state = GroupInner::default();
            }
        }

        let mut groups = GROUPS.lock().unwrap();
        let stale = groups
            .get(&self.group_id)
            .map(|weak| weak.upgrade().is_none())
            .unwrap_or(false);
        if stale {
            groups.remove(&self.group_id);
        }
    }
}

/// Connects a worker to a named group, blocking membership bookkeeping
/// only (the barrier happens on the first collective call).
pub fn join(
    group: impl Into<String>,
    rank: usize,
    world_size: usize,
) -> Result<Arc<WorkerSession>, CollectiveError> {
    let group = group.into();
    if world_size == 0 {
        return Err(CollectiveError::EmptyWorldSize(world_size));
    }
    if rank >= world_size {
        return Err(CollectiveError::RankOutOfBounds { rank, world_size });
    }

    let shared = {
        let mut guard = GROUPS.lock().unwrap();
        let entry = guard.entry(group.clone()).or_insert_with(Weak::new);
        if let Some(existing) = entry.upgrade() {
            existing
        } else {
            let created = Arc::new(GroupState::new());
            *entry = Arc::downgrade(&created);
            created
        }
    };

    {
        let mut state = shared.inner.lock().unwrap();
        if state.expected == 0 {
            state.expected = world_size;
        } else if state.expected != world_size {
            return Err(CollectiveError::WorldSizeMismatch {
                expected: state.expected,
                got: world_size,
            });
        }
        if !state.joined.insert(rank) {
            return Err(CollectiveError::DuplicateRank { rank });
        }
    }

    Ok(Arc::new(WorkerSession {
        group: shared,
        group_id: group,
        rank,
        world_size,
    }))
}

/// Barrier-synchronised element-wise sum across every member of the
/// session's group. Each worker's buffer is replaced with the reduced
/// values once all workers of the generation have contributed.
pub fn all_reduce_sum(
    session: &Arc<WorkerSession>,
    buffer: &mut [f32],
) -> Result<(), CollectiveError> {
    let group = &session.group;
    let mut state = group.inner.lock().unwrap();

    if state.expected == 0 {
        state.expected = session.world_size;
    }
    if state.expected != session.world_size {
        return Err(CollectiveError::WorldSizeMismatch {
            expected: state.expected,
            got: session.world_size,
        });
    }
    if !state.joined.contains(&session.rank) {
        return Err(CollectiveError::UnknownRank {
            rank: session.rank(),
        });
    }

    if state.arrived == 0 {
        state.generation = state.generation.wrapping_add(1);
        state.accumulator.clear();
        state.accumulator.resize(buffer.len(), 0.0);
        state.error = None;
    } else if state.accumulator.len() != buffer.len() {
        let error = CollectiveError::BufferLengthMismatch {
            expected: state.accumulator.len(),
            got: buffer.len(),
        };
        state.arrived = 0;
        state.ready_generation = state.generation;
        state.error = Some(error.clone());
        group.condvar.notify_all();
        return Err(error);
    }

    for (dst, value) in state.accumulator.iter_mut().zip(buffer.iter()) {
        *dst += *value;
    }

    state.arrived += 1;
    let current_generation = state.generation;

    if state.arrived == state.expected {
        state.result = state.accumulator.clone();
        state.arrived = 0;
        state.ready_generation = current_generation;
        group.condvar.notify_all();
    } else {
        while state.ready_generation != current_generation {
            state = group.condvar.wait(state).unwrap();
        }
    }

    if let Some(error) = state.error.clone() {
        return Err(error);
    }

    buffer.copy_from_slice(&state.result);
    Ok(())
}
