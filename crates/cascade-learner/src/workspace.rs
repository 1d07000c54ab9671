//! The shared training workspace.
//!
//! A [`Workspace`] bundles the one piece of mutable state every node in a
//! stack shares, the weight vector, together with the resolved options,
//! the parsed interaction set, and running progress statistics. It is passed
//! explicitly to every learner call; there is no process-global state.
//!
//! By convention only the algorithm layer writes weight slots; upstream
//! reductions treat the weight vector as write-only-by-delegation.

use tracing::info;

use cascade_core::weights::{InitializerConfig, WeightConfig};
use cascade_core::{InteractionSpec, IterationScope, WeightStore};

use crate::options::StackOptions;

/// Running loss statistics, with periodic progress lines.
///
/// Holdout examples are accounted separately: they never update weights and
/// their loss measures generalization rather than training progress.
#[derive(Debug, Clone, Default)]
pub struct ProgressRecorder {
    pub examples: u64,
    pub weighted_examples: f64,
    pub sum_loss: f64,
    pub holdout_examples: u64,
    pub holdout_sum_loss: f64,
    next_dump: u64,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self {
            next_dump: 1,
            ..Self::default()
        }
    }

    /// Records one finished example's loss.
    pub fn record(&mut self, loss: f64, weight: f64, holdout: bool) {
        if holdout {
            self.holdout_examples += 1;
            self.holdout_sum_loss += loss;
            return;
        }
        self.examples += 1;
        self.weighted_examples += weight;
        self.sum_loss += loss;
        if self.examples >= self.next_dump {
            info!(
                examples = self.examples,
                average_loss = self.average_loss(),
                "progress"
            );
            self.next_dump *= 2;
        }
    }

    /// Average training loss over weighted examples.
    pub fn average_loss(&self) -> f64 {
        if self.weighted_examples > 0.0 {
            self.sum_loss / self.weighted_examples
        } else {
            0.0
        }
    }

    /// Average loss over held-out examples.
    pub fn holdout_average_loss(&self) -> f64 {
        if self.holdout_examples > 0 {
            self.holdout_sum_loss / self.holdout_examples as f64
        } else {
            0.0
        }
    }

    /// Logs the end-of-run summary.
    pub fn summarize(&self) {
        info!(
            examples = self.examples,
            weighted_examples = self.weighted_examples,
            average_loss = self.average_loss(),
            "training finished"
        );
        if self.holdout_examples > 0 {
            info!(
                holdout_examples = self.holdout_examples,
                holdout_average_loss = self.holdout_average_loss(),
                "holdout"
            );
        }
    }
}

/// Shared state threaded through every learner call.
#[derive(Debug)]
pub struct Workspace {
    pub opts: StackOptions,
    pub weights: WeightStore,
    pub interactions: InteractionSpec,
    /// Sub-model multiplier claimed by the stack (1 without multiclass).
    pub num_models: u64,
    /// Cumulative importance weight of learned examples; drives the
    /// learning-rate schedule.
    pub t: f32,
    /// Passes completed so far.
    pub passes: u32,
    pub progress: ProgressRecorder,
}

impl Workspace {
    /// Builds a workspace from validated options and a stride claim.
    ///
    /// Fails when the interaction terms do not parse; like every other
    /// configuration error this is fatal before any example is processed.
    pub fn new(opts: StackOptions, stride_shift: u32) -> cascade_core::Result<Self> {
        let initializer = if opts.random_weights {
            InitializerConfig::Uniform {
                low: -1.0,
                high: 1.0,
            }
        } else if opts.initial_weight != 0.0 {
            InitializerConfig::Constant(opts.initial_weight)
        } else {
            InitializerConfig::Zeros
        };
        let weights = WeightStore::new(WeightConfig {
            num_bits: opts.num_bits,
            stride_shift,
            sparse: opts.sparse_weights,
            initializer,
            seed: opts.random_seed,
        });
        let interactions = InteractionSpec::parse(&opts.interactions)?;
        let num_models = opts.num_models();
        Ok(Self {
            opts,
            weights,
            interactions,
            num_models,
            t: 0.0,
            passes: 0,
            progress: ProgressRecorder::new(),
        })
    }

    /// Splits the workspace into the weight store and an iteration scope.
    ///
    /// The two borrows are disjoint, so algorithms can iterate features and
    /// mutate weights in the same expression.
    #[inline]
    pub fn predict_parts(&mut self) -> (&mut WeightStore, IterationScope<'_>) {
        (
            &mut self.weights,
            IterationScope::new(&self.interactions, self.num_models),
        )
    }

    /// The current decayed learning rate.
    ///
    /// `eta_t = eta * (initial_t / (initial_t + t))^power_t`; `power_t = 0`
    /// gives a constant rate.
    #[inline]
    pub fn eta(&self) -> f32 {
        let opts = &self.opts;
        if opts.power_t == 0.0 {
            opts.learning_rate
        } else {
            opts.learning_rate
                * (opts.initial_t / (opts.initial_t + self.t)).powf(opts.power_t)
        }
    }

    /// Clamps a raw scalar prediction to the configured range.
    #[inline]
    pub fn clamp_prediction(&self, raw: f32) -> f32 {
        raw.clamp(self.opts.min_prediction, self.opts.max_prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_schedule() {
        let opts = StackOptions {
            learning_rate: 0.5,
            power_t: 0.0,
            ..StackOptions::default()
        };
        let mut ws = Workspace::new(opts, 0).unwrap();
        assert_eq!(ws.eta(), 0.5);
        ws.t = 100.0;
        assert_eq!(ws.eta(), 0.5);

        let opts = StackOptions {
            learning_rate: 0.5,
            power_t: 1.0,
            initial_t: 1.0,
            ..StackOptions::default()
        };
        let mut ws = Workspace::new(opts, 0).unwrap();
        ws.t = 1.0;
        assert!((ws.eta() - 0.25).abs() < 1e-6);
        ws.t = 4.0;
        assert!((ws.eta() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_progress_recorder_averages() {
        let mut p = ProgressRecorder::new();
        p.record(1.0, 1.0, false);
        p.record(3.0, 1.0, false);
        p.record(10.0, 1.0, true);
        assert!((p.average_loss() - 2.0).abs() < 1e-9);
        assert_eq!(p.examples, 2);
        assert_eq!(p.holdout_examples, 1);
        assert!((p.holdout_average_loss() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_prediction() {
        let ws = Workspace::new(StackOptions::default(), 0).unwrap();
        assert_eq!(ws.clamp_prediction(100.0), 50.0);
        assert_eq!(ws.clamp_prediction(-100.0), -50.0);
        assert_eq!(ws.clamp_prediction(1.0), 1.0);
    }

    #[test]
    fn test_random_weights_initializer() {
        let opts = StackOptions {
            random_weights: true,
            num_bits: 4,
            ..StackOptions::default()
        };
        let mut ws = Workspace::new(opts, 0).unwrap();
        let any_nonzero = (0..16u64).any(|i| ws.weights.get(i, 0) != 0.0);
        assert!(any_nonzero);
    }
}
