//! Relays a partner's exchange through a contributor and settles it: meter
//! the bytes, debit the partner, credit the contributor, bump the session
//! counter and record the usage, all or nothing.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    error::LedgerError,
    model::{ContributorId, PartnerId, PartnerRecord},
    services::{
        locks::LedgerLocks,
        metering::{meter, UsageCharge},
        relay::{RelayError, RelayRequest, TrafficRelay},
        selector::ContributorSelector,
    },
    storage::{
        PartnerStore, SessionStore, SettlementDraft, SettlementReceipt, SettlementRejection,
        SettlementStore,
    },
};

pub const NOT_SHARING: &str = "User not actively sharing bandwidth";
pub const BALANCE_EXHAUSTED: &str = "Partner has insufficient balance";
pub const BALANCE_TOO_LOW: &str = "Partner has insufficient balance for this request";

/// A settled exchange, ready to hand back to the partner.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledExchange {
    pub contributor_id: ContributorId,
    pub status: u16,
    pub data: Value,
    pub charge: UsageCharge,
    pub receipt: SettlementReceipt,
}

#[derive(Clone)]
pub struct SettlementEngine<S> {
    store: S,
    relay: Arc<dyn TrafficRelay>,
    selector: ContributorSelector<S>,
    locks: LedgerLocks,
    relay_timeout: Duration,
}

impl<S> SettlementEngine<S>
where
    S: PartnerStore + SessionStore + SettlementStore + Clone,
{
    pub fn new(
        store: S,
        relay: Arc<dyn TrafficRelay>,
        selector: ContributorSelector<S>,
        locks: LedgerLocks,
        relay_timeout: Duration,
    ) -> Self {
        Self {
            store,
            relay,
            selector,
            locks,
            relay_timeout,
        }
    }

    /// Relays `request` for `partner` and settles the metered cost.
    ///
    /// Preconditions are checked before relaying so a doomed request never
    /// reaches a contributor. They are checked again inside the settlement
    /// transaction, and a failure at that point means the exchange happened
    /// but was not billed.
    pub async fn relay_and_settle(
        &self,
        partner: &PartnerId,
        contributor: Option<ContributorId>,
        request: RelayRequest,
    ) -> Result<SettledExchange, LedgerError> {
        request.validate()?;
        let contributor = self.selector.select(contributor).await?;
        let account = self.precheck(partner, &contributor).await?;

        let started = std::time::Instant::now();
        let response = match tokio::time::timeout(
            self.relay_timeout,
            self.relay.relay(&contributor, &request),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(relay_failure(&contributor, err)),
            Err(_) => return Err(relay_failure(&contributor, RelayError::Timeout)),
        };
        histogram!("relay_latency_seconds").record(started.elapsed().as_secs_f64());

        let request_bytes = request.wire_size();
        let response_bytes = response.wire_size();
        let charge = meter(request_bytes, response_bytes, account.price_per_gb);

        let draft = SettlementDraft {
            partner_id: partner.clone(),
            contributor_id: contributor.clone(),
            target_url: request.target_url,
            method: request.method,
            headers: request.headers,
            body: request.body,
            response_status: response.status,
            response_size: response_bytes,
            charge,
            recorded_at: Utc::now(),
        };

        let outcome = {
            let _guards = self.locks.settlement(partner, &contributor).await;
            self.store.apply_settlement(draft).await?
        };

        match outcome {
            Ok(receipt) => {
                counter!("settlements_total", "result" => "applied").increment(1);
                histogram!("settlement_cost_usd").record(charge.cost);
                info!(
                    partner = %partner,
                    contributor = %contributor,
                    usage_record = receipt.usage_record_id,
                    billed_mb = charge.billed_volume_mb,
                    cost = charge.cost,
                    "exchange settled"
                );
                Ok(SettledExchange {
                    contributor_id: contributor,
                    status: response.status,
                    data: response.data,
                    charge,
                    receipt,
                })
            }
            Err(rejection) => {
                counter!("settlements_total", "result" => "rejected_after_relay").increment(1);
                warn!(
                    partner = %partner,
                    contributor = %contributor,
                    ?rejection,
                    request_bytes,
                    response_bytes,
                    cost = charge.cost,
                    "relayed exchange could not be settled"
                );
                Err(rejection_error(rejection))
            }
        }
    }

    async fn precheck(
        &self,
        partner: &PartnerId,
        contributor: &ContributorId,
    ) -> Result<PartnerRecord, LedgerError> {
        let account = self
            .store
            .find_partner(partner)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("partner {partner}")))?;
        if !account.is_active() {
            return Err(rejection_error(SettlementRejection::PartnerInactive(
                account.status,
            )));
        }
        if self.store.find_active_session(contributor).await?.is_none() {
            return Err(LedgerError::ResourceUnavailable(NOT_SHARING.into()));
        }
        if account.balance <= 0.0 {
            counter!("settlements_total", "result" => "rejected_precheck").increment(1);
            return Err(LedgerError::InsufficientFunds(BALANCE_EXHAUSTED.into()));
        }
        Ok(account)
    }
}

fn relay_failure(contributor: &ContributorId, err: RelayError) -> LedgerError {
    counter!("settlements_total", "result" => "relay_failed").increment(1);
    warn!(contributor = %contributor, error = %err, "relay failed; nothing billed");
    LedgerError::ExternalService(err.to_string())
}

fn rejection_error(rejection: SettlementRejection) -> LedgerError {
    match rejection {
        SettlementRejection::PartnerMissing => LedgerError::NotFound("partner".into()),
        SettlementRejection::PartnerInactive(status) => {
            LedgerError::Auth(format!("partner account is {status}"))
        }
        SettlementRejection::NoActiveSession => {
            LedgerError::ResourceUnavailable(NOT_SHARING.into())
        }
        SettlementRejection::BalanceExhausted { .. } => {
            LedgerError::InsufficientFunds(BALANCE_EXHAUSTED.into())
        }
        SettlementRejection::InsufficientBalance { .. } => {
            LedgerError::InsufficientFunds(BALANCE_TOO_LOW.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PartnerStatus;

    #[test]
    fn rejections_map_to_ledger_errors() {
        assert_eq!(
            rejection_error(SettlementRejection::NoActiveSession),
            LedgerError::ResourceUnavailable(NOT_SHARING.into())
        );
        assert_eq!(
            rejection_error(SettlementRejection::InsufficientBalance {
                required: 2.0,
                available: 1.0
            }),
            LedgerError::InsufficientFunds(BALANCE_TOO_LOW.into())
        );
        assert!(matches!(
            rejection_error(SettlementRejection::PartnerInactive(PartnerStatus::Suspended)),
            LedgerError::Auth(_)
        ));
    }
}
