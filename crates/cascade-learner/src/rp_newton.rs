//! Online Newton with a random-projection sketch, epoch-batched.
//!
//! Unlike the Oja variant, the sketch directions here are fixed signed
//! random projections derived from hashing, so nothing per-direction is
//! stored per weight: slot 0 holds the weight and slot 1 its adaptive
//! accumulator. The node holds the projected curvature matrix `S`, the
//! correction coefficients `b`, and the diagonal preconditioner `D`.
//!
//! The sketch is refreshed on a delayed schedule: each learned example's
//! projected gradient is buffered, and every `epoch` examples the batch is
//! folded into `S` with the preconditioner and coefficients recomputed.
//! Buffered entries are released only after the batched update has consumed
//! them; an end-of-pass notification flushes a partial buffer.
//!
//! Each example costs two full passes through the iteration protocol: one
//! computing the linear term and the sketch projection, one applying the
//! per-coordinate weight step.

use cascade_core::error::Result;
use cascade_core::hashing::hash_bytes;
use cascade_core::io::StateIo;
use cascade_core::iterate::foreach_feature;
use cascade_core::{Example, Label, Prediction};

use crate::learner::{check_chain_name, Learner};
use crate::workspace::Workspace;

/// Number of weight slots the rp-Newton node claims.
pub const RP_SLOTS: u32 = 2;

/// One buffered projected gradient awaiting the batched sketch refresh.
#[derive(Debug, Clone)]
struct PendingGradient {
    zx: Vec<f32>,
    grad: f32,
}

/// Random-projection sketch online Newton base node.
#[derive(Debug)]
pub struct RpNewton {
    m: usize,
    epoch: usize,
    seed: u64,
    /// Projected curvature, row-major `m x m`.
    s: Vec<f32>,
    /// Bilinear correction coefficients.
    b: Vec<f32>,
    /// Diagonal preconditioner derived from `S`.
    d: Vec<f32>,
    buffer: Vec<PendingGradient>,
    pending_raw: f32,
    last_zx: Vec<f32>,
}

impl RpNewton {
    pub fn new(m: usize, epoch: usize, seed: u64) -> Self {
        Self {
            m,
            epoch,
            seed,
            s: vec![0.0; m * m],
            b: vec![0.0; m],
            d: vec![1.0; m],
            buffer: Vec::with_capacity(epoch),
            pending_raw: 0.0,
            last_zx: vec![0.0; m],
        }
    }

    /// The fixed signed projection of weight index `index` onto direction
    /// `k`, scaled so projected vectors keep comparable magnitude.
    #[cfg(test)]
    fn projection(&self, index: u64, k: usize) -> f32 {
        let h = hash_bytes(&index.to_le_bytes(), self.seed.wrapping_add(k as u64));
        let sign = if h & 1 == 0 { 1.0f32 } else { -1.0 };
        sign / (self.m as f32).sqrt()
    }

    /// Folds the buffered gradients into the sketch and recomputes the
    /// preconditioner and correction coefficients, then releases the buffer.
    fn flush(&mut self, ws: &mut Workspace) {
        if self.buffer.is_empty() {
            return;
        }
        let m = self.m;
        for pending in &self.buffer {
            let g2 = pending.grad * pending.grad;
            for r in 0..m {
                for c in 0..m {
                    self.s[r * m + c] += g2 * pending.zx[r] * pending.zx[c];
                }
            }
        }
        for kk in 0..m {
            self.d[kk] = 1.0 / (1.0 + self.s[kk * m + kk]).sqrt();
        }
        let eta = ws.eta();
        let scale = eta / self.buffer.len() as f32;
        for pending in &self.buffer {
            for kk in 0..m {
                self.b[kk] -= scale * pending.grad * self.d[kk] * pending.zx[kk];
            }
        }
        self.buffer.clear();
    }
}

impl Learner for RpNewton {
    fn name(&self) -> &'static str {
        "rp_newton"
    }

    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let m = self.m;
        let mut zx = vec![0.0f32; m];
        let mut raw = ex.label.initial();
        // Sketch-projection pass. The projection is a pure function of the
        // weight index, so nothing is read from weight slots beyond slot 0.
        {
            let seed = self.seed;
            let scale = 1.0 / (m as f32).sqrt();
            let (weights, scope) = ws.predict_parts();
            foreach_feature(scope, ex, |x, index| {
                let row = weights.row(index);
                raw += row[0] * x;
                for (kk, acc) in zx.iter_mut().enumerate() {
                    let h = hash_bytes(&index.to_le_bytes(), seed.wrapping_add(kk as u64));
                    let sign = if h & 1 == 0 { scale } else { -scale };
                    *acc += sign * x;
                }
            });
        }
        for kk in 0..m {
            raw += self.b[kk] * self.d[kk] * zx[kk];
        }
        self.pending_raw = raw;
        self.last_zx = zx;
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
        let eta = ws.eta();
        let grad = ws.opts.loss.first_derivative(self.pending_raw, label) * ex.weight();
        if grad == 0.0 {
            return;
        }

        // Immediate first-order pass.
        let (weights, scope) = ws.predict_parts();
        foreach_feature(scope, ex, |x, index| {
            let row = weights.row(index);
            let gx = grad * x;
            row[1] += gx * gx;
            row[0] -= eta * gx / (1.0 + row[1]).sqrt();
        });

        // Defer the sketch refresh until the epoch buffer fills.
        self.buffer.push(PendingGradient {
            zx: self.last_zx.clone(),
            grad,
        });
        if self.buffer.len() >= self.epoch {
            self.flush(ws);
        }
    }

    fn end_pass(&mut self, ws: &mut Workspace) {
        // A partial buffer is flushed, not discarded, at end of pass.
        self.flush(ws);
    }

    fn save_load(&mut self, io: &mut StateIo<'_>) -> Result<()> {
        check_chain_name(io, self.name())?;
        let mut m = self.m as u64;
        io.u64_field("sketch", &mut m)?;
        if io.is_read() && m as usize != self.m {
            return Err(cascade_core::CoreError::SerializationError {
                message: format!("sketch size mismatch: model has {m}, configured {}", self.m),
            });
        }
        let mut seed = self.seed;
        io.u64_field("seed", &mut seed)?;
        self.seed = seed;
        io.vec_f32_field("s", &mut self.s)?;
        io.vec_f32_field("b", &mut self.b)?;
        io.vec_f32_field("d", &mut self.d)
    }
}
