use anyhow::Result;
use clap::Parser;
use tracing::info;

use lanchat::cli::{handle_command, Cli};
use lanchat::utils::setup_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level).map_err(|e| anyhow::anyhow!("Logging setup failed: {}", e))?;

    info!("Starting lanchat as {}", cli.identity());

    handle_command(cli).await
}
