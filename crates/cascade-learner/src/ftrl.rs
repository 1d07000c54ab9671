//! FTRL-proximal base node.
//!
//! Per-weight slot layout (four slots, claimed at setup):
//! ```text
//! slot 0  the weight, recomputed lazily from z and g2
//! slot 1  last per-example gradient (bookkeeping)
//! slot 2  cumulative z
//! slot 3  cumulative squared gradient g2
//! ```
//!
//! The update per touched feature:
//! ```text
//! gt    = scaled_loss_derivative * x
//! g2'   = g2 + gt^2
//! sigma = (sqrt(g2') - sqrt(g2)) / alpha
//! z    += gt - sigma * w
//! ```
//! and the weight itself is a function of (z, g2), never updated by direct
//! addition:
//! ```text
//! w = 0                                   if |z| <= l1
//! w = -sign(z) * (|z| - l1)
//!     / (l2 + (beta + sqrt(g2)) / alpha)  otherwise
//! ```
//! Every read of the weight recomputes it from the accumulators, so the
//! incremental path and a from-scratch evaluation agree at every step.

use cascade_core::error::Result;
use cascade_core::io::StateIo;
use cascade_core::iterate::foreach_feature;
use cascade_core::{Example, Label, Prediction};

use crate::learner::{check_chain_name, Learner};
use crate::workspace::Workspace;

const SLOT_W: usize = 0;
const SLOT_G: usize = 1;
const SLOT_Z: usize = 2;
const SLOT_G2: usize = 3;

/// Number of weight slots the FTRL node claims.
pub const FTRL_SLOTS: u32 = 4;

/// FTRL-proximal base node.
#[derive(Debug)]
pub struct Ftrl {
    alpha: f32,
    beta: f32,
    pending_raw: f32,
}

impl Ftrl {
    pub fn new(alpha: f32, beta: f32) -> Self {
        Self {
            alpha,
            beta,
            pending_raw: 0.0,
        }
    }

    /// The proximal closed form: the weight as a function of (z, g2).
    #[inline]
    pub fn proximal(z: f32, g2: f32, alpha: f32, beta: f32, l1: f32, l2: f32) -> f32 {
        if z.abs() <= l1 {
            0.0
        } else {
            let sign = if z > 0.0 { 1.0 } else { -1.0 };
            -sign * (z.abs() - l1) / (l2 + (beta + g2.sqrt()) / alpha)
        }
    }
}

impl Learner for Ftrl {
    fn name(&self) -> &'static str {
        "ftrl"
    }

    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let alpha = self.alpha;
        let beta = self.beta;
        let l1 = ws.opts.l1;
        let l2 = ws.opts.l2;
        let mut raw = ex.label.initial();
        let (weights, scope) = ws.predict_parts();
        foreach_feature(scope, ex, |x, index| {
            let row = weights.row(index);
            let w = Self::proximal(row[SLOT_Z], row[SLOT_G2], alpha, beta, l1, l2);
            row[SLOT_W] = w;
            raw += w * x;
        });
        self.pending_raw = raw;
        let clamped = ws.clamp_prediction(raw);
        ex.pred = Prediction::Scalar(ws.opts.link.apply(clamped));
    }

    fn learn(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.predict(ws, ex);
        if ex.is_test() || ws.opts.testonly {
            return;
        }
        let Label::Simple { label, .. } = ex.label else {
            return;
        };
        ws.t += ex.weight();
        let grad = ws.opts.loss.first_derivative(self.pending_raw, label) * ex.weight();
        if grad == 0.0 {
            return;
        }
        let alpha = self.alpha;
        let (weights, scope) = ws.predict_parts();
        foreach_feature(scope, ex, |x, index| {
            let row = weights.row(index);
            let gt = grad * x;
            let g2_old = row[SLOT_G2];
            let g2_new = g2_old + gt * gt;
            let sigma = (g2_new.sqrt() - g2_old.sqrt()) / alpha;
            row[SLOT_Z] += gt - sigma * row[SLOT_W];
            row[SLOT_G2] = g2_new;
            row[SLOT_G] = gt;
        });
    }

    fn sensitivity(&mut self, ws: &mut Workspace, ex: &mut Example) -> f32 {
        let alpha = self.alpha;
        let beta = self.beta;
        let (weights, scope) = ws.predict_parts();
        let mut sum = 0.0f32;
        foreach_feature(scope, ex, |x, index| {
            let g2 = weights.get(index, SLOT_G2);
            sum += alpha * x * x / (beta + g2.sqrt() + 1.0);
        });
        sum
    }

    fn save_load(&mut self, io: &mut StateIo<'_>) -> Result<()> {
        check_chain_name(io, self.name())?;
        io.f32_field("alpha", &mut self.alpha)?;
        io.f32_field("beta", &mut self.beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::StackOptions;
    use cascade_core::LossFunction;

    fn workspace(l1: f32, l2: f32) -> Workspace {
        let opts = StackOptions {
            learning_rate: 0.1,
            l1,
            l2,
            num_bits: 10,
            loss: LossFunction::Squared,
            ..StackOptions::default()
        };
        Workspace::new(opts, 2).unwrap()
    }

    fn example(label: f32) -> Example {
        let mut ex = Example::new();
        ex.namespace_mut(b'a').add(1.0, 1);
        ex.label = Label::Simple {
            label,
            weight: 1.0,
            initial: 0.0,
        };
        ex.finalize(true, false);
        ex
    }

    #[test]
    fn test_weight_is_function_of_accumulators() {
        let alpha = 0.5;
        let beta = 1.0;
        let mut ws = workspace(0.0, 0.0);
        let mut ftrl = Ftrl::new(alpha, beta);

        // Touch the same feature twice with known labels; after each touch
        // the stored weight must equal the closed form evaluated directly
        // from the accumulated z and g2.
        for label in [1.0f32, -0.5] {
            let mut ex = example(label);
            ftrl.learn(&mut ws, &mut ex);
            let z = ws.weights.get(1, SLOT_Z);
            let g2 = ws.weights.get(1, SLOT_G2);
            let mut probe = example(0.0);
            probe.label = Label::None;
            ftrl.predict(&mut ws, &mut probe);
            let stored = ws.weights.get(1, SLOT_W);
            let closed = Ftrl::proximal(z, g2, alpha, beta, 0.0, 0.0);
            assert!(
                (stored - closed).abs() < 1e-6,
                "stored {stored} vs closed form {closed}"
            );
        }
    }

    #[test]
    fn test_l1_produces_exact_zero() {
        let mut ws = workspace(100.0, 0.0);
        let mut ftrl = Ftrl::new(0.1, 1.0);
        let mut ex = example(0.01);
        ftrl.learn(&mut ws, &mut ex);
        let mut probe = example(0.0);
        probe.label = Label::None;
        ftrl.predict(&mut ws, &mut probe);
        assert_eq!(ws.weights.get(1, SLOT_W), 0.0);
        assert_eq!(probe.pred.as_scalar().unwrap(), 0.0);
    }

    #[test]
    fn test_learning_moves_prediction_toward_label() {
        let mut ws = workspace(0.0, 0.0);
        let mut ftrl = Ftrl::new(0.5, 1.0);
        let mut last = 0.0f32;
        for _ in 0..50 {
            let mut ex = example(1.0);
            ftrl.learn(&mut ws, &mut ex);
            last = ex.pred.as_scalar().unwrap();
        }
        assert!(last > 0.5, "prediction after training: {last}");
    }

    #[test]
    fn test_accumulator_grows() {
        let mut ws = workspace(0.0, 0.0);
        let mut ftrl = Ftrl::new(0.5, 1.0);
        let mut ex = example(1.0);
        ftrl.learn(&mut ws, &mut ex);
        let g2_first = ws.weights.get(1, SLOT_G2);
        let mut ex = example(1.0);
        ftrl.learn(&mut ws, &mut ex);
        let g2_second = ws.weights.get(1, SLOT_G2);
        assert!(g2_first > 0.0);
        assert!(g2_second > g2_first);
    }
}
