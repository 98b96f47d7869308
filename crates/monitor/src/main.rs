//! Payout monitor binary that settles payouts left `processing` by rail
//! timeouts.

use std::io;
use std::sync::Arc;

use bandshare_domain::config::MonitorConfig;
use bandshare_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use bandshare_monitor::{run_monitor, HttpPayoutRail, MonitorError};
use bandshare_storage::SeaOrmStorage;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let rail = HttpPayoutRail::new(config.payout_rail())?;
    run_monitor(config, storage, Arc::new(rail)).await
}
