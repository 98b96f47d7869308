use bandshare_domain::services::payout::{PayoutEngine, SettleOutcome};
use bandshare_domain::storage::{EarningsStore, PayoutStore};
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use crate::worker::MonitorError;

/// Tally of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub unchanged: usize,
    pub errors: usize,
}

/// Asks the rail about every `processing` payout created before
/// `stale_before` (oldest first, at most `batch_size`) and records its answer.
///
/// A rail error on one payout is counted and skipped so the rest of the
/// batch still settles; storage errors abort the pass.
pub async fn reconcile_stale<S>(
    store: &S,
    engine: &PayoutEngine<S>,
    stale_before: DateTime<Utc>,
    batch_size: u64,
) -> Result<ReconcileSummary, MonitorError>
where
    S: EarningsStore + PayoutStore,
{
    let stale = store.list_stale_processing(stale_before, batch_size).await?;
    let mut summary = ReconcileSummary {
        examined: stale.len(),
        ..ReconcileSummary::default()
    };

    for payout in &stale {
        let result = match engine.reconcile(payout).await {
            Ok(SettleOutcome::Completed(_)) => {
                summary.completed += 1;
                "completed"
            }
            Ok(SettleOutcome::Failed(_)) => {
                summary.failed += 1;
                "failed"
            }
            Ok(SettleOutcome::Unchanged) => {
                summary.unchanged += 1;
                "unchanged"
            }
            Ok(SettleOutcome::AlreadyFinal) => "already_final",
            Err(err) => {
                summary.errors += 1;
                warn!(payout = %payout.id, error = %err, "payout reconciliation failed");
                "error"
            }
        };
        counter!("monitor_payouts_reconciled_total", "result" => result).increment(1);
    }

    if summary.examined > 0 {
        info!(
            examined = summary.examined,
            completed = summary.completed,
            failed = summary.failed,
            unchanged = summary.unchanged,
            errors = summary.errors,
            "reconciliation pass finished"
        );
    }
    Ok(summary)
}
