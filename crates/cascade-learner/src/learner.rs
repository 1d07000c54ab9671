//! The learner interface and chain conventions.
//!
//! A configured stack is a strictly linear chain of [`Learner`] nodes: the
//! outermost reduction wraps its base as an owned `Box<dyn Learner>`, and the
//! innermost node is one of the core algorithms. The driver only ever talks
//! to the top of the chain; reductions explicitly call into their base,
//! optionally transforming the example, its labels, or its `ft_offset`
//! around the call.
//!
//! Call contracts:
//! - `predict` writes `example.pred` and must not mutate weights.
//! - `learn` performs predict-then-update semantics; calling it twice is not
//!   side-effect free. Test examples (no ground truth) must not touch
//!   weights.
//! - `finish_example` runs exactly once per example, on the outermost node;
//!   it does terminal bookkeeping and never delegates to the base.
//! - `end_pass` propagates outer to inner.
//! - `save_load` writes this node's own payload and then delegates, so the
//!   chain order defines the on-disk layout identically for save and load.

use cascade_core::error::{CoreError, Result};
use cascade_core::io::StateIo;
use cascade_core::{Example, Label};

use crate::workspace::Workspace;

/// One node of the reduction chain.
///
/// `Send` so a data-parallel driver can move whole pipeline instances onto
/// worker threads; there is no intra-instance concurrency.
pub trait Learner: Send {
    /// Stable node name, recorded in the model file to detect chain
    /// mismatches between save and load.
    fn name(&self) -> &'static str;

    /// Computes and writes `example.pred` from the example's features.
    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example);

    /// Predicts, then updates weights from the resulting loss gradient.
    fn learn(&mut self, ws: &mut Workspace, ex: &mut Example);

    /// Applies a previously computed gradient without recomputing the
    /// prediction. Algorithms that do not decouple the two fall back to
    /// `learn`.
    fn update(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.learn(ws, ex);
    }

    /// Predicts `count` times at offsets `base, base+step, ...`, writing one
    /// scalar per sub-model into `out`.
    ///
    /// Semantically equivalent to `count` sequential predicts with
    /// `ft_offset` temporarily shifted; nodes may share feature-iteration
    /// work. A too-small `out` reports the required size and writes nothing.
    fn multipredict(
        &mut self,
        ws: &mut Workspace,
        ex: &mut Example,
        count: usize,
        step: u64,
        out: &mut [f32],
    ) -> Result<()> {
        if out.len() < count {
            return Err(CoreError::InsufficientBuffer {
                required: count,
                capacity: out.len(),
            });
        }
        let saved_offset = ex.ft_offset;
        let saved_pred = std::mem::take(&mut ex.pred);
        for (i, slot) in out.iter_mut().enumerate().take(count) {
            ex.ft_offset = saved_offset.wrapping_add(i as u64 * step);
            self.predict(ws, ex);
            *slot = ex.pred.as_scalar().unwrap_or(0.0);
        }
        ex.ft_offset = saved_offset;
        ex.pred = saved_pred;
        Ok(())
    }

    /// Estimate of how much the prediction would move for a unit change in
    /// the label. Used by margin-based reductions; the default knows
    /// nothing.
    fn sensitivity(&mut self, _ws: &mut Workspace, _ex: &mut Example) -> f32 {
        0.0
    }

    /// Serializes or deserializes this node's state, then its base's.
    fn save_load(&mut self, io: &mut StateIo<'_>) -> Result<()>;

    /// Terminal per-example bookkeeping. Runs once per example, on the
    /// outermost node only.
    fn finish_example(&mut self, ws: &mut Workspace, ex: &mut Example) {
        report_scalar_loss(ws, ex);
    }

    /// Notification that one full sweep over the training data completed.
    fn end_pass(&mut self, _ws: &mut Workspace) {}
}

/// Default scalar-loss accounting shared by the GD-family nodes.
pub fn report_scalar_loss(ws: &mut Workspace, ex: &mut Example) {
    let loss = match (&ex.label, &ex.pred) {
        (Label::Simple { label, .. }, pred) => match pred.as_scalar() {
            Some(p) => ws.opts.loss.value(p, *label) as f64,
            None => return,
        },
        _ => return,
    };
    if !loss.is_finite() {
        tracing::warn!(example = ex.example_number, loss, "non-finite loss");
    }
    let holdout = ex.is_test() && !ws.opts.testonly;
    ws.progress
        .record(loss * ex.weight() as f64, ex.weight() as f64, holdout);
}

/// Verifies a node name read back from a model stream.
///
/// A mismatch means the configured chain differs from the one that wrote
/// the model, which is unrecoverable.
pub fn check_chain_name(io: &mut StateIo<'_>, name: &'static str) -> Result<()> {
    let mut tag = name_tag(name);
    io.u64_field(name, &mut tag)?;
    if io.is_read() && tag != name_tag(name) {
        return Err(CoreError::SerializationError {
            message: format!("model chain mismatch at node {name}"),
        });
    }
    Ok(())
}

fn name_tag(name: &str) -> u64 {
    cascade_core::hashing::hash_bytes(name.as_bytes(), 0)
}
