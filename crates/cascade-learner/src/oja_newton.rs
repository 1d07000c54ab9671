//! Online Newton with an Oja curvature sketch.
//!
//! The node keeps an `m`-dimensional sketch of the curvature: per weight,
//! `m` raw sketch components live in slots alongside the weight and its
//! adaptive accumulator, while the node itself holds the small dense state:
//! an `m x m` basis transform `A`, the accumulated curvature matrix `K`, the
//! correction coefficients `b`, and the diagonal preconditioner `D`.
//!
//! Prediction combines the plain linear term with a bilinear correction
//! `sum_k b_k * D_k * (A Zx)_k`, where `Zx` is the sketch-projected feature
//! vector computed in a dedicated pass through the iteration protocol; the
//! gradient application is a second full pass. When the accumulated
//! curvature magnitude exceeds a large threshold, the basis is explicitly
//! re-orthogonalized (Gram-Schmidt) and accumulation restarts, which bounds
//! numeric blow-up without changing the algorithm's steady behavior.
//!
//! Slot layout: `0` weight, `1` squared-gradient accumulator, `2..2+m`
//! sketch components.

use cascade_core::error::Result;
use cascade_core::io::StateIo;
use cascade_core::iterate::foreach_feature;
use cascade_core::{Example, Label, Prediction};

use crate::learner::{check_chain_name, Learner};
use crate::workspace::Workspace;

/// Oja-sketch online Newton base node.
#[derive(Debug)]
pub struct OjaNewton {
    m: usize,
    /// Re-orthogonalization trigger on `max |K|`.
    threshold: f32,
    /// Basis transform, row-major `m x m`, initialized to identity.
    a: Vec<f32>,
    /// Accumulated curvature, row-major `m x m`.
    k: Vec<f32>,
    /// Bilinear correction coefficients.
    b: Vec<f32>,
    /// Diagonal preconditioner derived from `K`.
    d: Vec<f32>,
    pending_raw: f32,
    last_ax: Vec<f32>,
}

impl OjaNewton {
    /// Builds the node and reports how many weight slots it needs.
    pub fn new(m: usize, threshold: f32) -> (Self, u32) {
        let mut a = vec![0.0f32; m * m];
        for i in 0..m {
            a[i * m + i] = 1.0;
        }
        (
            Self {
                m,
                threshold,
                a,
                k: vec![0.0; m * m],
                b: vec![0.0; m],
                d: vec![1.0; m],
                pending_raw: 0.0,
                last_ax: vec![0.0; m],
            },
            2 + m as u32,
        )
    }

    fn mat_vec(mat: &[f32], v: &[f32], m: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; m];
        for (r, slot) in out.iter_mut().enumerate() {
            let row = &mat[r * m..(r + 1) * m];
            *slot = row.iter().zip(v).map(|(a, b)| a * b).sum();
        }
        out
    }

    /// Orthonormalizes the rows of `A`; degenerate rows reset to the unit
    /// basis vector of their position.
    fn gram_schmidt(a: &mut [f32], m: usize) {
        for r in 0..m {
            for prev in 0..r {
                let dot: f32 = (0..m).map(|c| a[r * m + c] * a[prev * m + c]).sum();
                for c in 0..m {
                    a[r * m + c] -= dot * a[prev * m + c];
                }
            }
            let norm: f32 = (0..m)
                .map(|c| a[r * m + c] * a[r * m + c])
                .sum::<f32>()
                .sqrt();
            if norm > 1e-10 {
                for c in 0..m {
                    a[r * m + c] /= norm;
                }
            } else {
                for c in 0..m {
                    a[r * m + c] = if c == r { 1.0 } else { 0.0 };
                }
            }
        }
    }

    fn max_abs(mat: &[f32]) -> f32 {
        mat.iter().fold(0.0f32, |acc, v| acc.max(v.abs()))
    }
}

/// Deterministic ±1 per (index, direction), identical on both weight
/// backings and across runs.
#[inline]
fn seed_sign(index: u64, direction: usize) -> f32 {
    let h = cascade_core::hashing::hash_bytes(&index.to_le_bytes(), direction as u64 + 1);
    if h & 1 == 0 {
        1.0
    } else {
        -1.0
    }
}

impl Learner for OjaNewton {
    fn name(&self) -> &'static str {
        "oja_newton"
    }

    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let m = self.m;
        let mut zx = vec![0.0f32; m];
        let mut raw = ex.label.initial();
        let (weights, scope) = ws.predict_parts();
        foreach_feature(scope, ex, |x, index| {
            let row = weights.row(index);
            raw += row[0] * x;
            for (kk, acc) in zx.iter_mut().enumerate() {
                *acc += row[2 + kk] * x;
            }
        });
        let ax = Self::mat_vec(&self.a, &zx, m);
        for kk in 0..m {
            raw += self.b[kk] * self.d[kk] * ax[kk];
        }
        self.pending_raw = raw;
        self.last_ax = ax;
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
        let m = self.m;
        let ax = self.last_ax.clone();

        // Rank-1 curvature accumulation and coefficient updates.
        for r in 0..m {
            for c in 0..m {
                self.k[r * m + c] += grad * grad * ax[r] * ax[c];
            }
        }
        for kk in 0..m {
            self.b[kk] -= eta * grad * self.d[kk] * ax[kk];
        }
        for kk in 0..m {
            self.d[kk] = 1.0 / (1.0 + self.k[kk * m + kk]).sqrt();
        }

        // Second pass: weight step and Oja update of the raw sketch. The
        // sketch components of an untouched row seed from a deterministic
        // sign pattern; a zero sketch would never leave zero under the
        // multiplicative Oja step.
        let (weights, scope) = ws.predict_parts();
        foreach_feature(scope, ex, |x, index| {
            let row = weights.row(index);
            if row[1] == 0.0 {
                for (kk, slot) in row[2..2 + m].iter_mut().enumerate() {
                    *slot = 0.1 * seed_sign(index, kk);
                }
            }
            let gx = grad * x;
            row[1] += gx * gx;
            row[0] -= eta * gx / (1.0 + row[1]).sqrt();
            for (kk, &axk) in ax.iter().enumerate() {
                row[2 + kk] += eta * gx * axk;
            }
        });

        if Self::max_abs(&self.k) > self.threshold {
            Self::gram_schmidt(&mut self.a, m);
            self.k.iter_mut().for_each(|v| *v = 0.0);
            self.d.iter_mut().for_each(|v| *v = 1.0);
        }
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
        io.vec_f32_field("a", &mut self.a)?;
        io.vec_f32_field("k", &mut self.k)?;
        io.vec_f32_field("b", &mut self.b)?;
        io.vec_f32_field("d", &mut self.d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::StackOptions;

    fn setup(threshold: f32) -> (Workspace, OjaNewton) {
        let (node, slots) = OjaNewton::new(3, threshold);
        let stride_shift = 32 - (slots - 1).leading_zeros();
        let opts = StackOptions {
            learning_rate: 0.1,
            power_t: 0.0,
            num_bits: 10,
            ..StackOptions::default()
        };
        (Workspace::new(opts, stride_shift).unwrap(), node)
    }

    fn example(label: f32) -> Example {
        let mut ex = Example::new();
        ex.namespace_mut(b'a').add(1.0, 1);
        ex.namespace_mut(b'a').add(0.5, 2);
        ex.label = Label::Simple {
            label,
            weight: 1.0,
            initial: 0.0,
        };
        ex.finalize(true, false);
        ex
    }

    #[test]
    fn test_learning_reduces_error() {
        let (mut ws, mut node) = setup(1e7);
        for _ in 0..100 {
            let mut ex = example(1.0);
            node.learn(&mut ws, &mut ex);
        }
        let mut probe = example(1.0);
        probe.label = Label::None;
        node.predict(&mut ws, &mut probe);
        let p = probe.pred.as_scalar().unwrap();
        assert!(p > 0.5, "prediction after training: {p}");
        assert!(p.is_finite());
    }

    #[test]
    fn test_reorthogonalization_triggers_and_stays_finite() {
        // A tiny threshold forces re-orthogonalization almost every step.
        let (mut ws, mut node) = setup(1e-3);
        for i in 0..50 {
            let mut ex = example(if i % 2 == 0 { 1.0 } else { -1.0 });
            node.learn(&mut ws, &mut ex);
        }
        assert!(node.a.iter().all(|v| v.is_finite()));
        // After a re-orth, K restarts from zero, so it stays small.
        assert!(OjaNewton::max_abs(&node.k) < 10.0);
        // Basis rows are unit-norm after Gram-Schmidt.
        let m = node.m;
        for r in 0..m {
            let norm: f32 = (0..m).map(|c| node.a[r * m + c].powi(2)).sum();
            assert!((norm - 1.0).abs() < 1e-3, "row {r} norm {norm}");
        }
    }

    #[test]
    fn test_gram_schmidt_orthonormalizes() {
        let mut a = vec![2.0, 0.0, 1.0, 1.0];
        OjaNewton::gram_schmidt(&mut a, 2);
        let dot = a[0] * a[2] + a[1] * a[3];
        assert!(dot.abs() < 1e-6);
        assert!(((a[0] * a[0] + a[1] * a[1]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sketch_slots_are_touched() {
        let (mut ws, mut node) = setup(1e7);
        let mut ex = example(1.0);
        node.learn(&mut ws, &mut ex);
        let touched = (0..node.m).any(|kk| ws.weights.get(1, 2 + kk) != 0.0);
        assert!(touched);
    }
}
