//! Cascade CLI argument surface.

pub mod commands;

use clap::{Parser, Subcommand};

use commands::{PredictCommand, TrainCommand};

/// Cascade: an online reduction-based learning toolkit.
#[derive(Parser, Debug)]
#[command(name = "cascade", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model from text-format examples
    Train(TrainCommand),
    /// Predict with a saved model
    Predict(PredictCommand),
}
