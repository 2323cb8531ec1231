//! SubjectScan CLI: subject-centric content discovery.
//!
//! Searches for content about a subject, learns better keywords from every
//! run, and keeps a scored, exportable dataset per subject.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
