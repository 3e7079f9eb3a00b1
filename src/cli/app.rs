use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, LoadedConfig};
use crate::metrics;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let LoadedConfig {
        mut config,
        path,
        found,
    } = load_config(cli.config.as_ref()).await?;
    config.apply_env_overrides();
    let _log_guard = init_logging(cli.requested_log_level(), &config.logging)?;
    metrics::register_metrics();

    info!("Starting WebPilot v{}", env!("CARGO_PKG_VERSION"));
    if found {
        info!("Loaded configuration from: {}", path.display());
    } else {
        info!("Config file not found, using defaults: {}", path.display());
    }

    let cli_context = CliContext::new(config, path, cli.output.clone());
    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
