//! ## kretslab-cli
//! **Command-line frontend for the Kretslab device simulator**
//!
//! Runs control scripts against a board layout, checks scripts without
//! running them, lists the device catalog and sweeps seeds for
//! nondeterminism.

use clap::Parser;
use kretslab_config::KretslabConfig;
use kretslab_telemetry::{EventLogger, MetricsRecorder};
use tracing::warn;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => KretslabConfig::load_from_path(path)?,
        None => KretslabConfig::load()?,
    };
    EventLogger::init(&config.telemetry.log_level);

    let metrics = if config.telemetry.metrics {
        match MetricsRecorder::try_new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    commands::run_command(cli, &config, metrics).await
}
