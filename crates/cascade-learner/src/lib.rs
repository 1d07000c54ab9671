//! The Cascade learner stack.
//!
//! Learning tasks reduce to chains of simpler ones: each reduction is a
//! [`Learner`] node wrapping a base node, bottoming out in one of the core
//! online algorithms (gradient descent family, FTRL-proximal, or an online
//! Newton sketch). The driver talks to the outermost node; everything below
//! is delegation with example/label/offset transformations around the call.

pub mod ftrl;
pub mod gd;
pub mod learner;
pub mod oja_newton;
pub mod options;
pub mod reductions;
pub mod rp_newton;
pub mod stack;
pub mod workspace;

pub use ftrl::Ftrl;
pub use gd::Gd;
pub use learner::Learner;
pub use oja_newton::OjaNewton;
pub use options::{Algorithm, Link, StackOptions};
pub use rp_newton::RpNewton;
pub use stack::{build_stack, BuiltStack};
pub use workspace::{ProgressRecorder, Workspace};
