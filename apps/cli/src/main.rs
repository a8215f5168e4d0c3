//! wordflow CLI: staged document pipeline runner.
//!
//! Runs extract → structure → split over a project's data areas, with
//! per-unit error artifacts and run-scoped logs.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
