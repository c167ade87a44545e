//! Home Assistant Rust Server
//!
//! Loads and validates the configuration directory, then keeps running
//! until interrupted.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ha_config::{
    default_config_dir, ensure_config_exists, HomeAssistant, HttpLocationService, LocationService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod integrations;

use integrations::builtin_integrations;

#[derive(Parser, Debug)]
#[command(name = "homeassistant")]
#[command(version = ha_core::VERSION)]
#[command(about = "Home Assistant configuration runtime")]
struct Cli {
    /// Directory that contains the Home Assistant configuration
    #[arg(short, long, value_name = "PATH_TO_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Check the configuration, report errors and exit
    #[arg(long)]
    check_config: bool,

    /// Do not look up missing location settings over the network
    #[arg(long)]
    no_detect: bool,
}

fn init_logging(log_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .context("Failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config_dir = cli.config.unwrap_or_else(default_config_dir);
    info!("Starting Home Assistant (Rust) {}", ha_core::VERSION);
    info!("Config directory: {}", config_dir.display());

    let location: Option<Arc<dyn LocationService>> = if cli.no_detect {
        None
    } else {
        Some(Arc::new(
            HttpLocationService::new().context("Failed to create location client")?,
        ))
    };

    let mut hass = HomeAssistant::new(&config_dir, Arc::new(builtin_integrations()));

    if cli.check_config {
        return match hass.check_config().await {
            None => {
                info!("Configuration is valid");
                Ok(())
            }
            Some(errors) => {
                eprintln!("{}", errors);
                bail!("Configuration is invalid");
            }
        };
    }

    ensure_config_exists(&config_dir, location.as_deref())
        .await
        .context("Unable to set up the configuration directory")?;

    if let Some(location) = location {
        hass = hass.with_location_service(location);
    }

    let report = hass
        .bootstrap()
        .await
        .context("Failed to load configuration")?;

    for domain in report.domains.keys() {
        info!(domain = %domain, "Ready to set up");
    }
    if !report.is_ok() {
        warn!(
            failed = ?report.failed,
            "Some components could not be set up"
        );
    }

    info!("Home Assistant is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    Ok(())
}
