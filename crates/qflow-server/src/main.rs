//! qflow - queue ticket dispatch service.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Queue ticket dispatch service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via QFLOW_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    qflow_telemetry::init_logging()?;

    info!("Starting qflow v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > QFLOW_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("QFLOW_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = qflow_server::AppConfig::load(&config_path)?;
    info!(
        bind_addr = %config.server.bind_addr,
        database = config.database.url.is_some(),
        "Configuration loaded"
    );

    qflow_server::run(config).await?;

    Ok(())
}
