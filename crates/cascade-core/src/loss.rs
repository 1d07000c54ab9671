//! Loss functions for scalar learners.
//!
//! The closed [`LossFunction`] enum mirrors the set of objectives the GD
//! family supports. Each variant provides the loss value and its first and
//! second derivatives with respect to the prediction; learners only consume
//! the derivatives.
//!
//! NaN/Inf produced by an overflowing prediction are not trapped here; they
//! propagate to the reporting layer, which may warn but must not crash.

use serde::{Deserialize, Serialize};

/// Scalar loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum LossFunction {
    /// Squared error, `0.5 * (p - y)^2`.
    #[default]
    Squared,
    /// Logistic loss over labels in {-1, +1}.
    Logistic,
    /// Hinge loss over labels in {-1, +1}.
    Hinge,
    /// Quantile (pinball) loss at quantile `tau`.
    Quantile { tau: f32 },
}

impl LossFunction {
    /// Loss value at prediction `p` for label `y`.
    pub fn value(&self, p: f32, y: f32) -> f32 {
        match self {
            LossFunction::Squared => 0.5 * (p - y) * (p - y),
            LossFunction::Logistic => (1.0 + (-y * p).exp()).ln(),
            LossFunction::Hinge => (1.0 - y * p).max(0.0),
            LossFunction::Quantile { tau } => {
                let e = y - p;
                if e > 0.0 {
                    tau * e
                } else {
                    (tau - 1.0) * e
                }
            }
        }
    }

    /// First derivative of the loss with respect to the prediction.
    pub fn first_derivative(&self, p: f32, y: f32) -> f32 {
        match self {
            LossFunction::Squared => p - y,
            LossFunction::Logistic => -y / (1.0 + (y * p).exp()),
            LossFunction::Hinge => {
                if y * p < 1.0 {
                    -y
                } else {
                    0.0
                }
            }
            LossFunction::Quantile { tau } => {
                let e = y - p;
                if e > 0.0 {
                    -tau
                } else {
                    1.0 - tau
                }
            }
        }
    }

    /// Second derivative of the loss with respect to the prediction.
    pub fn second_derivative(&self, p: f32, y: f32) -> f32 {
        match self {
            LossFunction::Squared => 1.0,
            LossFunction::Logistic => {
                let s = 1.0 / (1.0 + (-y * p).exp());
                s * (1.0 - s)
            }
            LossFunction::Hinge | LossFunction::Quantile { .. } => 0.0,
        }
    }

    /// Short name used in model headers and progress output.
    pub fn name(&self) -> &'static str {
        match self {
            LossFunction::Squared => "squared",
            LossFunction::Logistic => "logistic",
            LossFunction::Hinge => "hinge",
            LossFunction::Quantile { .. } => "quantile",
        }
    }
}
