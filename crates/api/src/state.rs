use std::{sync::Arc, time::Duration};

use bandshare_domain::config::RelayConfig;
use bandshare_domain::services::{
    auth::{ContributorAuthenticator, PartnerAuthenticator},
    locks::LedgerLocks,
    payout::PayoutEngine,
    rail::PaymentRail,
    relay::TrafficRelay,
    selector::ContributorSelector,
    settlement::SettlementEngine,
    sharing::SharingService,
    telemetry::TelemetryGuard,
};
use bandshare_storage::SeaOrmStorage;

/// Everything a handler needs, cloned into each actix worker. The engines
/// share one `LedgerLocks` so settlement and payouts serialize on the same
/// per-contributor lock.
#[derive(Clone)]
pub struct AppState {
    storage: SeaOrmStorage,
    settlement: SettlementEngine<SeaOrmStorage>,
    payouts: PayoutEngine<SeaOrmStorage>,
    sharing: SharingService<SeaOrmStorage>,
    partners: PartnerAuthenticator<SeaOrmStorage>,
    contributors: ContributorAuthenticator<SeaOrmStorage>,
    telemetry: TelemetryGuard,
}

impl AppState {
    pub fn new(
        storage: SeaOrmStorage,
        relay: Arc<dyn TrafficRelay>,
        rail: Option<Arc<dyn PaymentRail>>,
        relay_config: &RelayConfig,
        rail_timeout: Duration,
        telemetry: TelemetryGuard,
    ) -> Self {
        let locks = LedgerLocks::default();
        let auth_failures = telemetry.failure_tracker();
        let selector = ContributorSelector::new(
            storage.clone(),
            relay_config.min_headroom_mb(),
            relay_config.candidate_limit(),
        );

        Self {
            settlement: SettlementEngine::new(
                storage.clone(),
                relay,
                selector,
                locks.clone(),
                relay_config.timeout(),
            ),
            payouts: PayoutEngine::new(storage.clone(), rail, locks.clone(), rail_timeout),
            sharing: SharingService::new(storage.clone(), locks),
            partners: PartnerAuthenticator::new(storage.clone(), auth_failures.clone()),
            contributors: ContributorAuthenticator::new(storage.clone(), auth_failures),
            storage,
            telemetry,
        }
    }

    pub fn storage(&self) -> &SeaOrmStorage {
        &self.storage
    }

    pub fn settlement(&self) -> &SettlementEngine<SeaOrmStorage> {
        &self.settlement
    }

    pub fn payouts(&self) -> &PayoutEngine<SeaOrmStorage> {
        &self.payouts
    }

    pub fn sharing(&self) -> &SharingService<SeaOrmStorage> {
        &self.sharing
    }

    pub fn partners(&self) -> &PartnerAuthenticator<SeaOrmStorage> {
        &self.partners
    }

    pub fn contributors(&self) -> &ContributorAuthenticator<SeaOrmStorage> {
        &self.contributors
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }
}
