use chrono::{DateTime, NaiveTime, Utc};
use metrics::counter;
use tracing::info;

use crate::{
    error::LedgerError,
    model::{ContributorId, RelaySessionRecord, DEFAULT_BANDWIDTH_LIMIT_GB},
    services::locks::LedgerLocks,
    storage::{EarningsStore, SessionStore},
};

/// Contributor-facing view of earnings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarningsSummary {
    pub today_earned: f64,
    pub total_earned: f64,
}

/// Contributor session lifecycle and the read models around it.
#[derive(Clone)]
pub struct SharingService<S> {
    store: S,
    locks: LedgerLocks,
}

impl<S> SharingService<S>
where
    S: SessionStore + EarningsStore,
{
    pub fn new(store: S, locks: LedgerLocks) -> Self {
        Self { store, locks }
    }

    /// Opens a fresh session, closing whatever was active before.
    pub async fn start(
        &self,
        contributor: &ContributorId,
        bandwidth_limit_gb: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<RelaySessionRecord, LedgerError> {
        let limit = bandwidth_limit_gb.unwrap_or(DEFAULT_BANDWIDTH_LIMIT_GB);
        if !limit.is_finite() || limit <= 0.0 {
            return Err(LedgerError::validation(
                "bandwidthLimit must be a positive number of GB",
            ));
        }

        let _guard = self.locks.contributor(contributor).await;
        self.store.ensure_earnings(contributor, now).await?;
        let session = self.store.activate_session(contributor, limit, now).await?;
        counter!("sharing_sessions_total", "event" => "start").increment(1);
        info!(contributor = %contributor, session = session.id, limit_gb = limit, "sharing started");
        Ok(session)
    }

    /// Closes every active session. Stopping when nothing is active is not an
    /// error.
    pub async fn stop(
        &self,
        contributor: &ContributorId,
        now: DateTime<Utc>,
    ) -> Result<u64, LedgerError> {
        let _guard = self.locks.contributor(contributor).await;
        let closed = self.store.deactivate_sessions(contributor, now).await?;
        counter!("sharing_sessions_total", "event" => "stop").increment(1);
        info!(contributor = %contributor, closed, "sharing stopped");
        Ok(closed)
    }

    /// Megabytes relayed by sessions started since UTC midnight.
    pub async fn data_shared_today(
        &self,
        contributor: &ContributorId,
        now: DateTime<Utc>,
    ) -> Result<f64, LedgerError> {
        let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        Ok(self.store.data_shared_since(contributor, midnight).await?)
    }

    pub async fn earnings(
        &self,
        contributor: &ContributorId,
        now: DateTime<Utc>,
    ) -> Result<EarningsSummary, LedgerError> {
        let summary = match self.store.find_earnings(contributor).await? {
            Some(record) => EarningsSummary {
                today_earned: record.earned_on(now.date_naive()),
                total_earned: record.total_earned,
            },
            None => EarningsSummary {
                today_earned: 0.0,
                total_earned: 0.0,
            },
        };
        Ok(summary)
    }
}
