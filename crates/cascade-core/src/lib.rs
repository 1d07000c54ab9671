//! Core data model for Cascade.
//!
//! This crate holds everything the learner stack and its reductions share:
//! sparse feature storage with namespace bookkeeping, the hash families that
//! produce weight indices, the lazy interaction-expansion iteration protocol,
//! the strided weight vector with dense and sparse backings, the
//! example/label/prediction model, and scalar loss functions.

pub mod error;
pub mod example;
pub mod features;
pub mod hashing;
pub mod interactions;
pub mod io;
pub mod iterate;
pub mod loss;
pub mod weights;

pub use error::{CoreError, Result};
pub use example::{Example, Label, LabelType, Prediction};
pub use features::{Feature, Features};
pub use interactions::InteractionSpec;
pub use iterate::{foreach_feature, foreach_feature_counted, inline_predict, IterationScope};
pub use loss::LossFunction;
pub use weights::{InitializerConfig, WeightConfig, WeightStore};
