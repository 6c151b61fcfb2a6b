//! Writes the device index → bus id map used for workload attribution

use accel_exporter::config::LoggingConfig;
use accel_exporter::logging::init_logging;
use accel_telemetry::config::{AMD_VENDOR_ID, DEFAULT_SYSFS_ROOT};
use accel_telemetry::{BusMap, SysfsDeviceEnumerator};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "gen-device-map")]
#[command(about = "Generate the device index to PCI bus id map")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Output file
    #[arg(short, long, value_name = "FILE", default_value = "/data/devices.json")]
    output: PathBuf,

    /// DRM class directory
    #[arg(long = "sysfs_root", value_name = "DIR", default_value = DEFAULT_SYSFS_ROOT)]
    sysfs_root: PathBuf,

    /// PCI vendor id to enumerate ("any" for every vendor)
    #[arg(long = "vendor_id", value_name = "ID", default_value = AMD_VENDOR_ID)]
    vendor_id: String,

    /// Log level
    #[arg(long = "log_level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        ..Default::default()
    })?;

    let vendor_id = (cli.vendor_id != "any").then(|| cli.vendor_id.clone());
    let enumerator = SysfsDeviceEnumerator::new(&cli.sysfs_root).with_vendor_id(vendor_id);

    let map = BusMap::build(&enumerator)
        .with_context(|| format!("failed to enumerate devices under {}", cli.sysfs_root.display()))?;
    map.save(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    for (index, bus_id) in map.iter() {
        info!("{} -> {}", index, bus_id);
    }
    info!("Wrote {} devices to {}", map.len(), cli.output.display());
    Ok(())
}
