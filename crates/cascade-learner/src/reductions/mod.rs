//! Representative reductions.
//!
//! Each reduction wraps its base node, transforming labels, predictions, or
//! weight-index offsets around the delegated call. The set here exercises
//! every mechanism the chain provides: prediction-type changes (`binary`),
//! sub-model offsets and `multipredict` (`oaa`), and cost-regression with
//! per-class bookkeeping (`csoaa`).

mod binary;
mod csoaa;
mod oaa;

pub use binary::Binary;
pub use csoaa::Csoaa;
pub use oaa::Oaa;
