//! Main binary of the accelerator exporter

use accel_exporter::cli::Cli;
use accel_exporter::logging::init_logging;
use accel_exporter::Exporter;
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    init_logging(&config.logging)?;
    info!("Starting accel-exporter v{}", env!("CARGO_PKG_VERSION"));

    let mut exporter = match Exporter::connect(config).await {
        Ok(exporter) => exporter,
        Err(e) => {
            error!("Failed to start exporter: {}", e);
            return Err(e.into());
        }
    };

    exporter.run().await?;
    Ok(())
}
