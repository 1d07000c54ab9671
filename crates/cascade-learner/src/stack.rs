//! Two-phase construction of the reduction chain.
//!
//! Phase one resolves the stride budget: the base algorithm reports how many
//! weight slots it needs and the multiclass reductions claim their sub-model
//! multiplier, all before any weight address is computed. Phase two walks a
//! fixed, configuration-driven list of setup functions; each setup whose
//! activating option was supplied wraps the chain built so far, and each
//! whose option was absent returns its base unchanged, so the final chain
//! length is exactly the number of activated reductions.

use tracing::info;

use cascade_core::error::Result;

use crate::ftrl::{Ftrl, FTRL_SLOTS};
use crate::gd::Gd;
use crate::learner::Learner;
use crate::oja_newton::OjaNewton;
use crate::options::{Algorithm, StackOptions};
use crate::reductions::{Binary, Csoaa, Oaa};
use crate::rp_newton::{RpNewton, RP_SLOTS};
use crate::workspace::Workspace;

/// A configured workspace plus the outermost node of its chain.
pub struct BuiltStack {
    pub workspace: Workspace,
    pub top: Box<dyn Learner>,
}

/// Smallest stride shift whose stride covers `slots` weight slots.
pub fn stride_shift_for(slots: u32) -> u32 {
    if slots <= 1 {
        0
    } else {
        32 - (slots - 1).leading_zeros()
    }
}

type SetupFn = fn(&StackOptions, Box<dyn Learner>) -> Box<dyn Learner>;

/// Reduction setups in wrap order, innermost-first. The chain shape is
/// data-dependent on configuration, hence the dynamic dispatch.
const REDUCTION_SETUPS: &[SetupFn] = &[csoaa_setup, oaa_setup, binary_setup];

fn csoaa_setup(opts: &StackOptions, base: Box<dyn Learner>) -> Box<dyn Learner> {
    match opts.csoaa {
        Some(classes) => Box::new(Csoaa::new(classes, base)),
        None => base,
    }
}

fn oaa_setup(opts: &StackOptions, base: Box<dyn Learner>) -> Box<dyn Learner> {
    match opts.oaa {
        Some(classes) => Box::new(Oaa::new(classes, base)),
        None => base,
    }
}

fn binary_setup(opts: &StackOptions, base: Box<dyn Learner>) -> Box<dyn Learner> {
    if opts.binary {
        Box::new(Binary::new(base))
    } else {
        base
    }
}

/// Validates options, resolves the stride budget, and builds the chain.
///
/// Incompatible option combinations fail here, before any example is
/// processed.
pub fn build_stack(opts: StackOptions) -> Result<BuiltStack> {
    opts.validate()?;

    let (base, slots): (Box<dyn Learner>, u32) = match opts.algorithm {
        Algorithm::Sgd {
            adaptive,
            normalized,
        } => {
            let (gd, slots) = Gd::new(adaptive, normalized);
            (Box::new(gd), slots)
        }
        Algorithm::Ftrl { alpha, beta } => (Box::new(Ftrl::new(alpha, beta)), FTRL_SLOTS),
        Algorithm::OjaNewton { sketch, threshold } => {
            let (node, slots) = OjaNewton::new(sketch, threshold);
            (Box::new(node), slots)
        }
        Algorithm::RpNewton { sketch, epoch } => (
            Box::new(RpNewton::new(sketch, epoch, opts.random_seed)),
            RP_SLOTS,
        ),
    };

    let stride_shift = stride_shift_for(slots);
    let workspace = Workspace::new(opts.clone(), stride_shift)?;

    let mut top = base;
    for setup in REDUCTION_SETUPS {
        top = setup(&opts, top);
    }

    info!(
        algorithm = opts.algorithm.name(),
        top = top.name(),
        num_bits = opts.num_bits,
        stride = 1u32 << stride_shift,
        num_models = opts.num_models(),
        "stack built"
    );
    Ok(BuiltStack { workspace, top })
}
