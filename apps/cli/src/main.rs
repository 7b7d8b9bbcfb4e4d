//! pagetitles CLI: fetch a list of pages and record their titles.
//!
//! Reads URLs from a line list, a CSV column, or a spreadsheet export and
//! writes one `URL,Title,Datetime` row per URL.

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
