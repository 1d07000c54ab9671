//! Binary sign reduction.
//!
//! Maps the base's scalar output to a hard {-1, +1} decision and reports
//! 0/1 loss instead of the underlying regression loss.

use cascade_core::error::Result;
use cascade_core::io::StateIo;
use cascade_core::{Example, Label, Prediction};

use crate::learner::{check_chain_name, Learner};
use crate::workspace::Workspace;

pub struct Binary {
    base: Box<dyn Learner>,
}

impl Binary {
    pub fn new(base: Box<dyn Learner>) -> Self {
        Self { base }
    }

    fn threshold(ex: &mut Example) {
        if let Some(s) = ex.pred.as_scalar() {
            ex.pred = Prediction::Scalar(if s > 0.0 { 1.0 } else { -1.0 });
        }
    }
}

impl Learner for Binary {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn predict(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.base.predict(ws, ex);
        Self::threshold(ex);
    }

    fn learn(&mut self, ws: &mut Workspace, ex: &mut Example) {
        self.base.learn(ws, ex);
        Self::threshold(ex);
    }

    fn sensitivity(&mut self, ws: &mut Workspace, ex: &mut Example) -> f32 {
        self.base.sensitivity(ws, ex)
    }

    fn save_load(&mut self, io: &mut StateIo<'_>) -> Result<()> {
        check_chain_name(io, self.name())?;
        self.base.save_load(io)
    }

    fn finish_example(&mut self, ws: &mut Workspace, ex: &mut Example) {
        let loss = match (&ex.label, ex.pred.as_scalar()) {
            (Label::Simple { label, .. }, Some(decision)) => {
                if (*label > 0.0) == (decision > 0.0) {
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
