//! The gradient-descent family.
//!
//! One node covers plain, adaptive (AdaGrad-style), and normalized online
//! gradient descent; the variants differ only in which auxiliary slots they
//! keep per weight and how the per-coordinate step is scaled.
//!
//! Slot layout (claimed at setup, before any address is computed):
//! ```text
//! slot 0            the weight itself
//! slot 1 (adaptive) running sum of squared per-feature gradients
//! slot 2 (normalized, or slot 1 when adaptive is off)
//!                   largest |x| seen for this index
//! ```
//!
//! The normalized variant stores the weight in units that keep the effective
//! contribution `w * x` invariant when a larger-magnitude value arrives for
//! an index: on each visit, the rescale check runs before the gradient is
//! accumulated, in that order, sequentially per feature. The first nonzero
//! observation sets the normalizer outright rather than dividing by zero.

use cascade_core::error::Result;
use cascade_core::io::StateIo;
use cascade_core::iterate::foreach_feature;
use cascade_core::{Example, Label, Prediction};

use crate::learner::{check_chain_name, Learner};
use crate::workspace::Workspace;

/// Gradient-descent base node.
#[derive(Debug)]
pub struct Gd {
    adaptive: bool,
    normalized: bool,
    slot_accum: usize,
    slot_norm: usize,
    /// Raw (pre-link, pre-clamp) prediction of the last predict call; the
    /// decoupled `update` path consumes it.
    pending_raw: f32,
}

impl Gd {
    /// Builds the node and reports how many weight slots it needs.
    pub fn new(adaptive: bool, normalized: bool) -> (Self, u32) {
        let mut slots = 1u32;
        let mut slot_accum = 0usize;
        let mut slot_norm = 0usize;
        if adaptive {
            slot_accum = slots as usize;
            slots += 1;
        }
        if normalized {
            slot_norm = slots as usize;
            slots += 1;
        }
        (
            Self {
                adaptive,
                normalized,
                slot_accum,
                slot_norm,
                pending_raw: 0.0,
            },
            slots,
        )
    }

    fn simple_label(ex: &Example) -> Option<f32> {
        match ex.label {
            Label::Simple { label, .. } => Some(label),
            _ => None,
        }
    }

    fn apply_update(&mut self, ws: &mut Workspace, ex: &mut Example, grad: f32, eta: f32) {
        let adaptive = self.adaptive;
        let normalized = self.normalized;
        let slot_accum = self.slot_accum;
        let slot_norm = self.slot_norm;
        let l1 = ws.opts.l1;
        let l2 = ws.opts.l2;
        let (weights, scope) = ws.predict_parts();
        foreach_feature(scope, ex, |x, index| {
            let row = weights.row(index);
            let mut xn = x;
            if normalized {
                let ax = x.abs();
                let n = row[slot_norm];
                if ax > n {
                    if n > 0.0 {
                        let ratio = n / ax;
                        row[0] *= ratio * ratio;
                    }
                    row[slot_norm] = ax;
                }
                xn = x / row[slot_norm];
            }
            let g = grad * xn;
            let mut rate = eta;
            if adaptive {
                row[slot_accum] += g * g;
                rate /= row[slot_accum].sqrt();
            }
            if normalized {
                rate /= row[slot_norm];
            }
            let mut w = row[0] - rate * g;
            if l2 > 0.0 {
                w -= rate * l2 * row[0];
            }
            if l1 > 0.0 {
                w = w.signum() * (w.abs() - rate * l1).max(0.0);
            }
            row[0] = w;
        });
    }
}

impl Learner for Gd {
    fn name(&self) -> &'static str {
        "gd"
    }

    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let (weights, scope) = ws.predict_parts();
        let raw = cascade_core::inline_predict(weights, scope, ex);
        self.pending_raw = raw;
        let clamped = ws.clamp_prediction(raw);
        ex.pred = Prediction::Scalar(ws.opts.link.apply(clamped));
    }

    fn learn(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.predict(ws, ex);
        if ex.is_test() || ws.opts.testonly {
            return;
        }
        self.update(ws, ex);
    }

    fn update(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let Some(label) = Self::simple_label(ex) else {
            return;
        };
        if ex.is_test() || ws.opts.testonly {
            return;
        }
        ws.t += ex.weight();
        let eta = ws.eta();
        let grad = ws.opts.loss.first_derivative(self.pending_raw, label) * ex.weight();
        if grad != 0.0 {
            self.apply_update(ws, ex, grad, eta);
        }
    }

    fn sensitivity(&mut self, ws: &mut Workspace, ex: &mut Example) -> f32 {
        let adaptive = self.adaptive;
        let slot_accum = self.slot_accum;
        let eta = ws.eta();
        let (weights, scope) = ws.predict_parts();
        let mut sum = 0.0f32;
        foreach_feature(scope, ex, |x, index| {
            if adaptive {
                let acc = weights.get(index, slot_accum);
                let scale = if acc > 0.0 { acc.sqrt() } else { 1.0 };
                sum += x * x / scale;
            } else {
                sum += x * x;
            }
        });
        eta * sum
    }

    fn save_load(&mut self, io: &mut StateIo<'_>) -> Result<()> {
        check_chain_name(io, self.name())
    }
}
