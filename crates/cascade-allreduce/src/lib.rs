//! Data-parallel synchronization.
//!
//! N independent pipeline instances, each with its own example shard and
//! local weight vector, coordinate at exactly one point: the all-reduce
//! barrier. Every instance blocks until all peers arrive, after which each
//! instance's vector is replaced by an elementwise reduction across all
//! peers' vectors. Between barriers, cross-instance state is explicitly
//! unspecified and must not be read as final.
//!
//! There are no process globals: every participant holds a
//! [`ClusterContext`] naming its rank, the world size, and the shared slot
//! table, and passes it to each call that synchronizes.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

/// Errors for all-reduce operations.
#[derive(Debug, Error)]
pub enum AllreduceError {
    /// Participants disagreed on the vector length.
    #[error("all-reduce length mismatch: rank {rank} brought {length}, expected {expected}")]
    LengthMismatch {
        rank: usize,
        length: usize,
        expected: usize,
    },
}

/// A specialized Result type for all-reduce operations.
pub type Result<T> = std::result::Result<T, AllreduceError>;

/// The elementwise reduction applied across peers.
///
/// `Sum` and `Average` serve weight deltas; `Min` and `Max` serve the small
/// structural metadata some reductions synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Average,
    Min,
    Max,
}

impl ReduceOp {
    #[inline]
    fn fold(&self, acc: f32, v: f32) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Average => acc + v,
            ReduceOp::Min => acc.min(v),
            ReduceOp::Max => acc.max(v),
        }
    }
}

struct Shared {
    state: Mutex<RoundState>,
    arrived: Condvar,
    collected: Condvar,
}

struct RoundState {
    /// Per-rank contribution for the current round.
    slots: Vec<Option<Vec<f32>>>,
    /// Reduced result of the current round, kept until every rank copies it.
    result: Option<Vec<f32>>,
    /// How many ranks have copied the current result out.
    drained: usize,
    /// Round counter guarding against a fast rank lapping a slow one.
    round: u64,
}

/// One participant's handle on the cluster.
#[derive(Clone)]
pub struct ClusterContext {
    pub rank: usize,
    pub world: usize,
    shared: Arc<Shared>,
}

impl ClusterContext {
    /// Builds contexts for an in-process cluster of `world` participants.
    pub fn local_cluster(world: usize) -> Vec<ClusterContext> {
        assert!(world > 0, "cluster needs at least one participant");
        let shared = Arc::new(Shared {
            state: Mutex::new(RoundState {
                slots: (0..world).map(|_| None).collect(),
                result: None,
                drained: 0,
                round: 0,
            }),
            arrived: Condvar::new(),
            collected: Condvar::new(),
        });
        (0..world)
            .map(|rank| ClusterContext {
                rank,
                world,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Blocks until every peer has contributed, then replaces `data` with
    /// the elementwise reduction of all contributions.
    ///
    /// Every rank must call with the same length and the same op within one
    /// round; a length mismatch is reported to the offending rank and
    /// poisons the round, so treat it as fatal for the cluster.
    pub fn all_reduce(&self, data: &mut [f32], op: ReduceOp) -> Result<()> {
        if self.world == 1 {
            // Reducing one participant is the identity for every op.
            return Ok(());
        }
        let mut state = self.shared.state.lock();

        // Wait for the previous round to fully drain before contributing.
        while state.result.is_some() {
            self.shared.collected.wait(&mut state);
        }
        let round = state.round;
        if let Some(existing) = state.slots.iter().flatten().next() {
            if existing.len() != data.len() {
                return Err(AllreduceError::LengthMismatch {
                    rank: self.rank,
                    length: data.len(),
                    expected: existing.len(),
                });
            }
        }
        state.slots[self.rank] = Some(data.to_vec());

        if state.slots.iter().all(Option::is_some) {
            // Last arrival performs the reduction.
            let mut acc = state.slots[0].take().expect("slot 0 present");
            for slot in state.slots.iter_mut().skip(1) {
                let v = slot.take().expect("slot present");
                for (a, b) in acc.iter_mut().zip(v.iter()) {
                    *a = op.fold(*a, *b);
                }
            }
            if op == ReduceOp::Average {
                let n = self.world as f32;
                for a in acc.iter_mut() {
                    *a /= n;
                }
            }
            debug!(round, len = acc.len(), "all-reduce round complete");
            state.result = Some(acc);
            state.drained = 0;
            self.shared.arrived.notify_all();
        } else {
            while state.round == round && state.result.is_none() {
                self.shared.arrived.wait(&mut state);
            }
        }

        let result = state.result.as_ref().expect("result present");
        data.copy_from_slice(result);
        state.drained += 1;
        if state.drained == self.world {
            state.result = None;
            state.round += 1;
            self.shared.collected.notify_all();
        }
        Ok(())
    }
}
