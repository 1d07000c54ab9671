//! Stack configuration.
//!
//! [`StackOptions`] is the resolved option set every reduction's setup reads.
//! Options are resolved before any node's predict/learn runs, and "was this
//! reduction activated" is queryable here, which is how setup functions
//! detect incompatible co-activation.

use serde::{Deserialize, Serialize};

use cascade_core::error::{CoreError, Result};
use cascade_core::hashing::HashFamily;
use cascade_core::{LabelType, LossFunction};

/// The base algorithm at the bottom of every stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Gradient descent family. `adaptive` turns on per-coordinate AdaGrad
    /// scaling, `normalized` turns on max-seen feature-value normalization.
    Sgd { adaptive: bool, normalized: bool },
    /// FTRL-proximal with per-coordinate accumulators.
    Ftrl { alpha: f32, beta: f32 },
    /// Online Newton with an Oja curvature sketch of `sketch` directions.
    OjaNewton { sketch: usize, threshold: f32 },
    /// Online Newton with a random-projection sketch, refreshed every
    /// `epoch` buffered examples.
    RpNewton { sketch: usize, epoch: usize },
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Sgd {
            adaptive: false,
            normalized: false,
        }
    }
}

impl Algorithm {
    /// Short name used in logs and the model header.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sgd { .. } => "sgd",
            Algorithm::Ftrl { .. } => "ftrl",
            Algorithm::OjaNewton { .. } => "oja_newton",
            Algorithm::RpNewton { .. } => "rp_newton",
        }
    }
}

/// Link function applied to the scalar output of the base learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Link {
    #[default]
    Identity,
    /// Sigmoid to (0, 1).
    Logistic,
    /// Scaled sigmoid to (-1, 1).
    Glf1,
}

impl Link {
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Link::Identity => x,
            Link::Logistic => 1.0 / (1.0 + (-x).exp()),
            Link::Glf1 => 2.0 / (1.0 + (-x).exp()) - 1.0,
        }
    }
}

/// The full resolved configuration of a learner stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackOptions {
    pub algorithm: Algorithm,
    pub learning_rate: f32,
    /// Exponent of the learning-rate decay; 0 gives a constant rate.
    pub power_t: f32,
    /// Time offset of the decay schedule.
    pub initial_t: f32,
    pub l1: f32,
    pub l2: f32,
    /// log2 of the number of distinct weight indices.
    pub num_bits: u32,
    /// Use the sparse hash-map weight backing.
    pub sparse_weights: bool,
    /// Constant initial weight for slot 0.
    pub initial_weight: f32,
    /// Initialize slot 0 uniformly at random in [-1, 1) instead.
    pub random_weights: bool,
    pub random_seed: u64,
    pub hash: HashFamily,
    /// Interaction terms as written on the command line.
    pub interactions: Vec<String>,
    pub loss: LossFunction,
    pub link: Link,
    pub min_prediction: f32,
    pub max_prediction: f32,
    /// Map scalar predictions to {-1, +1}.
    pub binary: bool,
    /// One-against-all multiclass with this many classes.
    pub oaa: Option<u32>,
    /// Cost-sensitive one-against-all with this many classes.
    pub csoaa: Option<u32>,
    /// Do not add the constant (bias) feature.
    pub noconstant: bool,
    /// Materialize audit names and print per-feature breakdowns.
    pub audit: bool,
    /// Predict only; never update weights.
    pub testonly: bool,
    /// Hold out every k-th example from training (0 disables).
    pub holdout_period: u32,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            learning_rate: 0.5,
            power_t: 0.5,
            initial_t: 1.0,
            l1: 0.0,
            l2: 0.0,
            num_bits: 18,
            sparse_weights: false,
            initial_weight: 0.0,
            random_weights: false,
            random_seed: 0,
            hash: HashFamily::default(),
            interactions: Vec::new(),
            loss: LossFunction::default(),
            link: Link::Identity,
            min_prediction: -50.0,
            max_prediction: 50.0,
            binary: false,
            oaa: None,
            csoaa: None,
            noconstant: false,
            audit: false,
            testonly: false,
            holdout_period: 0,
        }
    }
}

impl StackOptions {
    /// Rejects incompatible option combinations.
    ///
    /// Configuration errors are fatal and reported before any learning
    /// begins.
    pub fn validate(&self) -> Result<()> {
        if self.oaa.is_some() && self.csoaa.is_some() {
            return Err(CoreError::config(
                "--oaa and --csoaa are mutually exclusive",
            ));
        }
        if self.binary && (self.oaa.is_some() || self.csoaa.is_some()) {
            return Err(CoreError::config(
                "--binary applies to scalar predictions and cannot stack on a multiclass reduction",
            ));
        }
        if let Some(k) = self.oaa.or(self.csoaa) {
            if k < 2 {
                return Err(CoreError::config("multiclass needs at least 2 classes"));
            }
        }
        if self.num_bits == 0 || self.num_bits > 31 {
            return Err(CoreError::config("num_bits must be in 1..=31"));
        }
        if self.learning_rate <= 0.0 {
            return Err(CoreError::config("learning_rate must be positive"));
        }
        if self.initial_t <= 0.0 && self.power_t != 0.0 {
            return Err(CoreError::config(
                "initial_t must be positive when power_t is nonzero",
            ));
        }
        match self.algorithm {
            Algorithm::Ftrl { alpha, .. } if alpha <= 0.0 => {
                return Err(CoreError::config("ftrl alpha must be positive"))
            }
            Algorithm::OjaNewton { sketch, .. } | Algorithm::RpNewton { sketch, .. }
                if sketch == 0 =>
            {
                return Err(CoreError::config("sketch size must be positive"))
            }
            Algorithm::RpNewton { epoch, .. } if epoch == 0 => {
                return Err(CoreError::config("epoch size must be positive"))
            }
            _ => {}
        }
        Ok(())
    }

    /// The label kind the parser must produce for this configuration.
    pub fn label_type(&self) -> LabelType {
        if self.csoaa.is_some() {
            LabelType::CostSensitive
        } else if self.oaa.is_some() {
            LabelType::Multiclass
        } else {
            LabelType::Simple
        }
    }

    /// The sub-model multiplier the stack claims for weight addressing.
    pub fn num_models(&self) -> u64 {
        self.oaa.or(self.csoaa).unwrap_or(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_validate() {
        assert!(StackOptions::default().validate().is_ok());
    }

    #[test]
    fn test_oaa_csoaa_exclusive() {
        let opts = StackOptions {
            oaa: Some(3),
            csoaa: Some(3),
            ..StackOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_binary_incompatible_with_multiclass() {
        let opts = StackOptions {
            binary: true,
            oaa: Some(3),
            ..StackOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_label_type_follows_activation() {
        let mut opts = StackOptions::default();
        assert_eq!(opts.label_type(), LabelType::Simple);
        opts.oaa = Some(4);
        assert_eq!(opts.label_type(), LabelType::Multiclass);
        assert_eq!(opts.num_models(), 4);
        opts.oaa = None;
        opts.csoaa = Some(3);
        assert_eq!(opts.label_type(), LabelType::CostSensitive);
    }

    #[test]
    fn test_bad_bits_rejected() {
        let opts = StackOptions {
            num_bits: 0,
            ..StackOptions::default()
        };
        assert!(opts.validate().is_err());
        let opts = StackOptions {
            num_bits: 40,
            ..StackOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_options_serialization() {
        let opts = StackOptions {
            algorithm: Algorithm::Ftrl {
                alpha: 0.1,
                beta: 1.0,
            },
            interactions: vec!["ab".to_string()],
            oaa: Some(5),
            ..StackOptions::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        let restored: StackOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.algorithm, opts.algorithm);
        assert_eq!(restored.oaa, Some(5));
        assert_eq!(restored.interactions, opts.interactions);
    }

    #[test]
    fn test_link_functions() {
        assert_eq!(Link::Identity.apply(3.0), 3.0);
        assert!((Link::Logistic.apply(0.0) - 0.5).abs() < 1e-6);
        assert!(Link::Glf1.apply(0.0).abs() < 1e-6);
        assert!(Link::Glf1.apply(10.0) > 0.99);
    }
}
