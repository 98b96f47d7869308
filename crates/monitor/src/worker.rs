use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use bandshare_domain::{
    config::{ConfigError, MonitorConfig},
    services::{
        locks::LedgerLocks,
        payout::PayoutEngine,
        rail::{PaymentRail, RailError},
        telemetry::TelemetryError,
    },
    storage::StorageError,
};
use bandshare_storage::SeaOrmStorage;

use crate::pipeline::reconcile_stale;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("payout rail error: {0}")]
    Rail(#[from] RailError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Runs reconciliation passes forever, one per poll interval.
pub async fn run_monitor(
    config: MonitorConfig,
    storage: SeaOrmStorage,
    rail: Arc<dyn PaymentRail>,
) -> Result<(), MonitorError> {
    let engine = PayoutEngine::new(
        storage.clone(),
        Some(rail),
        LedgerLocks::default(),
        config.payout_rail().timeout(),
    );
    let stale_after = chrono::Duration::from_std(config.stale_after())
        .unwrap_or_else(|_| chrono::Duration::days(365));
    info!(
        poll_interval = ?config.poll_interval(),
        stale_after = ?config.stale_after(),
        batch_size = config.batch_size(),
        "payout monitor started"
    );

    loop {
        let cutoff = Utc::now() - stale_after;
        match reconcile_stale(&storage, &engine, cutoff, config.batch_size()).await {
            Ok(summary) => {
                counter!("monitor_passes_total", "result" => "ok").increment(1);
                gauge!("monitor_last_batch_examined").set(summary.examined as f64);
            }
            Err(err) => {
                counter!("monitor_passes_total", "result" => "error").increment(1);
                warn!(error = %err, "reconciliation pass failed");
            }
        }
        sleep(config.poll_interval()).await;
    }
}
