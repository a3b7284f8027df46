//! quire: book and chapter manager with debounced autosave.

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = quire_server::cli::Cli::parse();
    quire_server::run_with_cli(cli).await
}
