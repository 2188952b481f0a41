use clap::Parser;
use tracing::error;

use cluster_harness::cli::{self, Cli};
use cluster_harness::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = logging::init(&cli.log_dir) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = cli::run(cli).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
