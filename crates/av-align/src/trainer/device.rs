// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of AVAlign — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::sync::Arc;

use super::collective::{self, CollectiveError, WorkerSession};
use crate::AlignResult;

/// Reduction strategy applied to metrics once synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricReduce {
    /// Keep the sum aggregated across all peers.
    Sum,
    /// Average the aggregated value over the world size.
    Mean,
}

/// Trait implemented by devices a training worker can run on.
///
/// These are the only points where workers touch shared state: the
/// gradient all-reduce once per batch and metric aggregation at epoch
/// boundaries. Collective failures propagate immediately.
pub trait TrainingDevice: Send + Sync {
    /// Identifier of the current worker inside the distributed world.
    fn rank(&self) -> usize;
    /// Total number of workers that contribute gradients.
    fn world_size(&self) -> usize;
    /// Synchronizes gradients in-place, averaging across workers.
    fn synchronize_gradients(&self, gradients: &mut [f32]) -> AlignResult<()>;
    /// Aggregates the provided metrics in-place per the reduction policy.
    fn aggregate_metrics(&self, metrics: &mut [f32], reduce: MetricReduce) -> AlignResult<()>;
}

/// Single-process device that performs no synchronization.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuDevice;

impl CpuDevice {
    pub fn new() -> Self {
        Self
    }
}

impl TrainingDevice for CpuDevice {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn synchronize_gradients(&self, _gradients: &mut [f32]) -> AlignResult<()> {
        Ok(())
    }

    fn aggregate_metrics(&self, _metrics: &mut [f32], _reduce: MetricReduce) -> AlignResult<()> {
        Ok(())
    }
}

/// Data-parallel device backed by a worker-group session.
#[derive(Debug, Clone)]
pub struct DistributedDevice {
    session: Arc<WorkerSession>,
}

impl DistributedDevice {
    /// Joins the named worker group and blocks on the startup barrier:
    /// `connect` returns only once every rank of the world has arrived.
    pub fn connect(
        group: impl Into<String>,
        rank: usize,
        world_size: usize,
    ) -> Result<Self, CollectiveError> {
        let session = collective::join(group, rank, world_size)?;
        let mut barrier = [0.0f32];
        collective::all_reduce_sum(&session, &mut barrier)?;
        Ok(Self { session })
    }
}

impl TrainingDevice for DistributedDevice {
    fn rank(&self) -> usize {
        self.session.rank()
    }

    fn world_size(&self) -> usize {
        self.session.world_size()
    }

    fn synchronize_gradients(&self, gradients: &mut [f32]) -> AlignResult<()> {
        collective::all_reduce_sum(&self.session, gradients)?;
        let scale = 1.0 / self.session.world_size() as f32;
        gradients.iter_mut().for_each(|value| *value *= scale);
        Ok(())
    }

    fn aggregate_metrics(&self, metrics: &mut [f32], reduce: MetricReduce) -> AlignResult<()> {
        collective::all_reduce_sum(&self.session, metrics)?;
        if reduce == MetricReduce::Mean {
            let scale = 1.0 / self.world_size() as f32;
            metrics.iter_mut().for_each(|value| *value *= scale);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_device_is_rank_zero_of_one() {
        let device = CpuDevice::new();
        assert_eq!(device.rank(), 0);
        assert_eq!(device.world_size(), 1);
        let mut gradients = vec![1.0, 2.0];
        device.synchronize_gradients(&mut gradients).unwrap();
        assert_eq!(gradients, vec![1.0, 2.0]);
    }

    #[test]
    fn distributed_device_all_reduce_averages_gradients() {
        let world = 2;
        let mut handles = Vec::new();
        for rank in 0..world {
            handles.push(std::thread::spawn(move || {
                let device = DistributedDevice::connect("device-grads", rank, world).unwrap();
                let mut gradients = vec![rank as f32 + 1.0, 2.0];
                device.synchronize_gradients(&mut gradients).unwrap();
                gradients
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![1.5, 2.0]);
        }
    }

    #[test]
    fn distributed_device_aggregates_metrics_with_both_reductions() {
        let world = 3;
        let mut handles = Vec::new();
        for rank in 0..world {
            handles.push(std::thread::spawn(move || {
                let device = DistributedDevice::connect("device-metrics", rank, world).unwrap();
                let mut means = vec![rank as f32];
                device
                    .aggregate_metrics(&mut means, MetricReduce::Mean)
                    .unwrap();
                let mut sums = vec![1.0f32];
                device
                    .aggregate_metrics(&mut sums, MetricReduce::Sum)
                    .unwrap();
                (means, sums)
            }));
        }
        for handle in handles {
            let (means, sums) = handle.join().unwrap();
            assert!((means[0] - 1.0).abs() < f32::EPSILON);
            assert!((sums[0] - 3.0).abs() < f32::EPSILON);
        }
    }
}
