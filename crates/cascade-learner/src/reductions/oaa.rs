//! One-against-all multiclass reduction.
//!
//! Class `k` of `K` lives in its own weight region: the stack claims a
//! sub-model multiplier of `K`, and this node steps the example's
//! `ft_offset` through `0..K` so each per-class regressor addresses a
//! disjoint residue of the index space. Prediction is one `multipredict`
//! over the shared feature iteration; learning turns the multiclass label
//! into `K` binary regression problems against the base.

use tracing::warn;

use cascade_core::error::Result;
use cascade_core::io::StateIo;
use cascade_core::{Example, Label, Prediction};

use crate::learner::{check_chain_name, Learner};
use crate::workspace::Workspace;

pub struct Oaa {
    classes: u32,
    base: Box<dyn Learner>,
    scores: Vec<f32>,
}

impl Oaa {
    pub fn new(classes: u32, base: Box<dyn Learner>) -> Self {
        Self {
            classes,
            base,
            scores: vec![0.0; classes as usize],
        }
    }

    fn best_class(scores: &[f32]) -> u32 {
        let mut best = 0usize;
        for (i, &s) in scores.iter().enumerate() {
            if s > scores[best] {
                best = i;
            }
        }
        best as u32 + 1
    }
}

impl Learner for Oaa {
    fn name(&self) -> &'static str {
        "oaa"
    }

    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let count = self.classes as usize;
        let mut scores = std::mem::take(&mut self.scores);
        if let Err(err) = self.base.multipredict(ws, ex, count, 1, &mut scores) {
            warn!(%err, "oaa multipredict failed");
            self.scores = scores;
            return;
        }
        ex.pred = Prediction::Multiclass(Self::best_class(&scores));
        self.scores = scores;
    }

    fn learn(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.predict(ws, ex);
        let (class, weight) = match ex.label {
            Label::Multiclass { class, weight } => (class, weight),
            _ => return,
        };
        if class > self.classes {
            warn!(
                class,
                classes = self.classes,
                "label class out of range; treating example as test-only"
            );
            ex.test_only = true;
            return;
        }
        let saved_label = std::mem::take(&mut ex.label);
        let saved_pred = std::mem::take(&mut ex.pred);
        let saved_offset = ex.ft_offset;
        for i in 0..self.classes {
            ex.ft_offset = saved_offset.wrapping_add(i as u64);
            ex.label = Label::Simple {
                label: if i + 1 == class { 1.0 } else { -1.0 },
                weight,
                initial: 0.0,
            };
            self.base.learn(ws, ex);
        }
        ex.ft_offset = saved_offset;
        ex.label = saved_label;
        ex.pred = saved_pred;
    }

    fn sensitivity(&mut self, ws: &mut Workspace, ex: &mut Example) -> f32 {
        self.base.sensitivity(ws, ex)
    }

    fn save_load(&mut self, io: &mut StateIo<'_>) -> Result<()> {
        check_chain_name(io, self.name())?;
        let mut classes = self.classes;
        io.u32_field("classes", &mut classes)?;
        if io.is_read() && classes != self.classes {
            return Err(cascade_core::CoreError::SerializationError {
                message: format!(
                    "class count mismatch: model has {classes}, configured {}",
                    self.classes
                ),
            });
        }
        self.base.save_load(io)
    }

    fn finish_example(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let loss = match (&ex.label, &ex.pred) {
            (Label::Multiclass { class, .. }, Prediction::Multiclass(predicted)) => {
                if class == predicted {
                    0.0
                } else {
                    ex.weight() as f64
                }
            }
            _ => return,
        };
        let holdout = ex.is_test() && !ws.opts.testonly;
        ws.progress.record(loss, ex.weight() as f64, holdout);
    }

    fn end_pass(&mut self, ws: &mut Workspace) {
        self.base.end_pass(ws);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gd::Gd;
    use crate::options::StackOptions;

    fn stack(classes: u32) -> (Workspace, Oaa) {
        let (gd, slots) = Gd::new(false, false);
        let opts = StackOptions {
            learning_rate: 0.5,
            power_t: 0.0,
            num_bits: 12,
            oaa: Some(classes),
            ..StackOptions::default()
        };
        let ws = Workspace::new(opts, slots - 1).unwrap();
        (ws, Oaa::new(classes, Box::new(gd)))
    }

    fn example(class: u32, pairs: &[(u64, f32)]) -> Example {
        let mut ex = Example::new();
        for &(index, value) in pairs {
            ex.namespace_mut(b'a').add(value, index);
        }
        ex.label = Label::Multiclass { class, weight: 1.0 };
        ex.finalize(true, false);
        ex
    }

    #[test]
    fn test_learns_separable_classes() {
        let (mut ws, mut node) = stack(3);
        for _ in 0..20 {
            for class in 1..=3u32 {
                let mut ex = example(class, &[(class as u64 * 100, 1.0)]);
                node.learn(&mut ws, &mut ex);
            }
        }
        for class in 1..=3u32 {
            let mut probe = example(class, &[(class as u64 * 100, 1.0)]);
            probe.label = Label::None;
            node.predict(&mut ws, &mut probe);
            assert_eq!(probe.pred, Prediction::Multiclass(class));
        }
    }

    #[test]
    fn test_out_of_range_class_is_test_only() {
        let (mut ws, mut node) = stack(3);
        let mut ex = example(7, &[(1, 1.0)]);
        node.learn(&mut ws, &mut ex);
        assert!(ex.test_only);
        // No sub-model was updated.
        for offset in 0..3u64 {
            assert_eq!(ws.weights.get(3 + offset, 0), 0.0);
        }
    }

    #[test]
    fn test_offset_restored_after_learn() {
        let (mut ws, mut node) = stack(3);
        let mut ex = example(1, &[(1, 1.0)]);
        node.learn(&mut ws, &mut ex);
        assert_eq!(ex.ft_offset, 0);
        assert!(matches!(ex.pred, Prediction::Multiclass(_)));
        assert!(matches!(ex.label, Label::Multiclass { .. }));
    }

    #[test]
    fn test_multiclass_loss_accounting() {
        let (mut ws, mut node) = stack(3);
        let mut ex = example(2, &[(1, 1.0)]);
        node.predict(&mut ws, &mut ex);
        node.finish_example(&mut ws, &mut ex);
        // Untrained ties resolve to class 1, so class 2 is a miss.
        assert!((ws.progress.average_loss() - 1.0).abs() < 1e-9);
    }
}
