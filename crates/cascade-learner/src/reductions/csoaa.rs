//! Cost-sensitive one-against-all reduction.
//!
//! Each candidate class gets a regressor trained on the observed cost, in
//! its own weight region via the sub-model offset. Prediction scores every
//! class with one `multipredict` and picks the lowest estimated cost;
//! reported loss is the true cost of the chosen class.

use tracing::warn;

use cascade_core::error::Result;
use cascade_core::example::Wclass;
use cascade_core::io::StateIo;
use cascade_core::{Example, Label, Prediction};

use crate::learner::{check_chain_name, Learner};
use crate::workspace::Workspace;

pub struct Csoaa {
    classes: u32,
    base: Box<dyn Learner>,
    scores: Vec<f32>,
}

impl Csoaa {
    pub fn new(classes: u32, base: Box<dyn Learner>) -> Self {
        Self {
            classes,
            base,
            scores: vec![0.0; classes as usize],
        }
    }

    fn cheapest_class(scores: &[f32]) -> u32 {
        let mut best = 0usize;
        for (i, &s) in scores.iter().enumerate() {
            if s < scores[best] {
                best = i;
            }
        }
        best as u32 + 1
    }
}

impl Learner for Csoaa {
    fn name(&self) -> &'static str {
        "csoaa"
    }

    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let count = self.classes as usize;
        let mut scores = std::mem::take(&mut self.scores);
        if let Err(err) = self.base.multipredict(ws, ex, count, 1, &mut scores) {
            warn!(%err, "csoaa multipredict failed");
            self.scores = scores;
            return;
        }
        // Record per-class cost estimates on the label for downstream
        // inspection.
        if let Label::CostSensitive { costs } = &mut ex.label {
            for wc in costs.iter_mut() {
                if (1..=scores.len() as u32).contains(&wc.class) {
                    wc.partial_prediction = scores[(wc.class - 1) as usize];
                }
            }
        }
        ex.pred = Prediction::Multiclass(Self::cheapest_class(&scores));
        self.scores = scores;
    }

    fn learn(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.predict(ws, ex);
        let costs: Vec<Wclass> = match &ex.label {
            Label::CostSensitive { costs } if !costs.is_empty() => costs.clone(),
            _ => return,
        };
        if costs.iter().any(|wc| wc.class == 0 || wc.class > self.classes) {
            warn!(
                classes = self.classes,
                "cost-sensitive label names a class out of range; treating example as test-only"
            );
            ex.test_only = true;
            return;
        }
        let saved_label = std::mem::take(&mut ex.label);
        let saved_pred = std::mem::take(&mut ex.pred);
        let saved_offset = ex.ft_offset;
        for wc in &costs {
            ex.ft_offset = saved_offset.wrapping_add((wc.class - 1) as u64);
            ex.label = Label::Simple {
                label: wc.cost,
                weight: 1.0,
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
            (Label::CostSensitive { costs }, Prediction::Multiclass(predicted)) => costs
                .iter()
                .find(|wc| wc.class == *predicted)
                .map(|wc| wc.cost as f64)
                .unwrap_or(0.0),
            _ => return,
        };
        let holdout = ex.is_test() && !ws.opts.testonly;
        ws.progress.record(loss, ex.weight() as f64, holdout);
    }

    fn end_pass(&mut self, ws: &mut Workspace) {
        self.base.end_pass(ws);
    }
}
