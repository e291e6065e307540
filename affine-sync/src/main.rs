//! affine-sync: command-line access to AFFiNE workspace documents.

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = affine_sync::cli::Cli::parse();
    affine_sync::run_with_cli(cli).await
}
