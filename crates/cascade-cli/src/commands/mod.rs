//! CLI subcommand implementations.

mod predict;
mod train;

pub use predict::PredictCommand;
pub use train::TrainCommand;
