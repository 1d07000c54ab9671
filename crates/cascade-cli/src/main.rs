//! Cascade CLI - command-line interface for training and prediction.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cascade_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cascade=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train(cmd) => cmd.run()?,
        Commands::Predict(cmd) => cmd.run()?,
    }
    Ok(())
}
