//! Cross-worker gradient reduction for data-parallel training.
//!
//! Every worker owns a replica of the network and computes gradients on its
//! own shard. Before any worker applies its optimizer step, gradients are
//! summed slot by slot across workers (and divided by the worker count when
//! averaging). The reduction is a blocking collective: every worker must
//! call it once per step.

use std::cell::Cell;
use std::sync::{Arc, Barrier, Mutex};

use crate::config::ParallelConfig;
use crate::error::{DetrError, Result};

use super::gradients::GradientSet;

/// All-reduce over gradient sets.
pub trait GradientReducer: Send {
    /// Replace `grads` with the reduction across all workers.
    ///
    /// Blocks until every worker has contributed.
    fn all_reduce(&self, grads: &mut GradientSet) -> Result<()>;

    /// Number of participating workers.
    fn world_size(&self) -> usize;
}

struct Contribution {
    round: u64,
    layout: Vec<Vec<usize>>,
    values: Vec<f32>,
}

/// Shared rendezvous for workers running as threads of one process.
pub struct ReduceGroup {
    world_size: usize,
    contributions: Mutex<Vec<Option<Contribution>>>,
    barrier: Barrier,
}

impl std::fmt::Debug for ReduceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReduceGroup")
            .field("world_size", &self.world_size)
            .finish()
    }
}

impl ReduceGroup {
    /// Create a group for `world_size` workers.
    pub fn new(world_size: usize) -> Arc<Self> {
        Arc::new(Self {
            world_size,
            contributions: Mutex::new((0..world_size).map(|_| None).collect()),
            barrier: Barrier::new(world_size.max(1)),
        })
    }

    /// Number of workers in the group.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Reducer handle for the worker described by `parallel`.
    pub fn reducer(self: &Arc<Self>, parallel: &ParallelConfig) -> Result<InProcessReducer> {
        parallel.validate().map_err(DetrError::config)?;
        if parallel.device_count != self.world_size {
            return Err(DetrError::config(format!(
                "device_count {} does not match reduce group of {}",
                parallel.device_count, self.world_size
            )));
        }
        Ok(InProcessReducer {
            group: Arc::clone(self),
            rank: parallel.rank,
            gradients_mean: parallel.gradients_mean,
            round: Cell::new(0),
        })
    }
}

/// One worker's handle on a [`ReduceGroup`].
///
/// Each call to [`GradientReducer::all_reduce`] is one round. Contributions
/// are stamped with the round number and cleared once every worker has read
/// them, so a worker never sums gradients left over from an earlier step.
#[derive(Debug, Clone)]
pub struct InProcessReducer {
    group: Arc<ReduceGroup>,
    rank: usize,
    gradients_mean: bool,
    round: Cell<u64>,
}

impl InProcessReducer {
    /// Rank of this worker.
    pub fn rank(&self) -> usize {
        self.rank
    }

    fn lock_error() -> DetrError {
        DetrError::Distributed {
            message: "reduce group poisoned by a failed worker".to_string(),
        }
    }

    /// Number of completed reduction rounds.
    pub fn rounds(&self) -> u64 {
        self.round.get()
    }

    fn publish(&self, grads: &GradientSet, round: u64) -> Result<()> {
        let values = grads
            .slots()
            .iter()
            .flat_map(|s| s.values.iter().copied())
            .collect();
        let mut slots = self
            .group
            .contributions
            .lock()
            .map_err(|_| Self::lock_error())?;
        slots[self.rank] = Some(Contribution {
            round,
            layout: grads.layout(),
            values,
        });
        Ok(())
    }

    fn retract(&self) -> Result<()> {
        let mut slots = self
            .group
            .contributions
            .lock()
            .map_err(|_| Self::lock_error())?;
        slots[self.rank] = None;
        Ok(())
    }

    fn sum_contributions(&self, layout: &[Vec<usize>], len: usize, round: u64) -> Result<Vec<f32>> {
        let slots = self
            .group
            .contributions
            .lock()
            .map_err(|_| Self::lock_error())?;

        let mut total = vec![0.0f32; len];
        for (rank, slot) in slots.iter().enumerate() {
            let contribution = slot.as_ref().ok_or_else(|| DetrError::Distributed {
                message: format!("worker {} did not contribute gradients", rank),
            })?;
            if contribution.round != round {
                return Err(DetrError::Distributed {
                    message: format!(
                        "worker {} contributed gradients of round {}, expected round {}",
                        rank, contribution.round, round
                    ),
                });
            }
            if contribution.layout != layout {
                return Err(DetrError::Distributed {
                    message: format!(
                        "worker {} has {} gradient slots with a different layout than worker {} ({})",
                        rank,
                        contribution.layout.len(),
                        self.rank,
                        layout.len()
                    ),
                });
            }
            for (t, v) in total.iter_mut().zip(&contribution.values) {
                *t += v;
            }
        }
        Ok(total)
    }
}

impl GradientReducer for InProcessReducer {
    fn all_reduce(&self, grads: &mut GradientSet) -> Result<()> {
        let layout = grads.layout();
        let len = grads.num_values();

        let round = self.round.get() + 1;
        self.round.set(round);

        // Both barriers are always reached so a failing worker cannot strand the others.
        let published = self.publish(grads, round);
        self.group.barrier.wait();
        let reduced = published.and_then(|_| self.sum_contributions(&layout, len, round));
        self.group.barrier.wait();
        let retracted = self.retract();

        let mut total = reduced?;
        retracted?;
        if self.gradients_mean {
            let inv = 1.0 / self.group.world_size as f32;
            for v in &mut total {
                *v *= inv;
            }
        }

        let mut offset = 0;
        for slot in grads.slots_mut() {
            let n = slot.values.len();
            slot.values.copy_from_slice(&total[offset..offset + n]);
            offset += n;
        }
        Ok(())
    }

    fn world_size(&self) -> usize {
        self.group.world_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::gradients::GradientSlot;
    use burn::module::ParamId;
    use std::thread;

    fn grads(values: Vec<f32>) -> GradientSet {
        GradientSet::new(vec![GradientSlot {
            id: ParamId::new(),
            shape: vec![values.len()],
            values,
        }])
    }

    #[test]
    fn test_mean_of_distinct_gradients() {
        let group = ReduceGroup::new(2);
        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let reducer = group.reducer(&ParallelConfig::distributed(2, rank)).unwrap();
                thread::spawn(move || {
                    let mut g = grads(vec![rank as f32 * 2.0, 1.0]);
                    reducer.all_reduce(&mut g).unwrap();
                    g.slots()[0].values.clone()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![1.0, 1.0]);
        }
    }

    #[test]
    fn test_sum_without_mean() {
        let group = ReduceGroup::new(2);
        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let parallel = ParallelConfig::distributed(2, rank).with_gradients_mean(false);
                let reducer = group.reducer(&parallel).unwrap();
                thread::spawn(move || {
                    let mut g = grads(vec![1.5]);
                    reducer.all_reduce(&mut g).unwrap();
                    g.slots()[0].values[0]
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3.0);
        }
    }

    #[test]
    fn test_layout_mismatch_fails_every_worker() {
        let group = ReduceGroup::new(2);
        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let reducer = group.reducer(&ParallelConfig::distributed(2, rank)).unwrap();
                thread::spawn(move || {
                    let mut g = grads(vec![1.0; rank + 1]);
                    reducer.all_reduce(&mut g).is_err()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_slots_cleared_after_round() {
        let group = ReduceGroup::new(2);
        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let reducer = group.reducer(&ParallelConfig::distributed(2, rank)).unwrap();
                thread::spawn(move || {
                    for _ in 0..3 {
                        let mut g = grads(vec![1.0]);
                        reducer.all_reduce(&mut g).unwrap();
                    }
                    reducer.rounds()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3);
        }
        let slots = group.contributions.lock().unwrap();
        assert!(slots.iter().all(Option::is_none));
    }

    #[test]
    fn test_stale_contribution_rejected() {
        let group = ReduceGroup::new(2);
        let reducer = group.reducer(&ParallelConfig::distributed(2, 0)).unwrap();
        {
            let mut slots = group.contributions.lock().unwrap();
            for slot in slots.iter_mut() {
                *slot = Some(Contribution {
                    round: 1,
                    layout: vec![vec![1]],
                    values: vec![2.0],
                });
            }
        }

        assert_eq!(reducer.sum_contributions(&[vec![1]], 1, 1).unwrap(), vec![4.0]);

        // Worker 1 failed to publish for round 2; its round-1 gradients remain.
        group.contributions.lock().unwrap()[0].as_mut().unwrap().round = 2;
        let err = reducer.sum_contributions(&[vec![1]], 1, 2).unwrap_err();
        assert!(err.to_string().contains("round 1"));
    }

    #[test]
    fn test_group_size_mismatch() {
        let group = ReduceGroup::new(2);
        assert!(group.reducer(&ParallelConfig::distributed(4, 0)).is_err());
    }
}
