use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{
    ContributorId, ContributorTokenRecord, DateWindow, EarningsRecord, HttpMethod,
    NewContributorToken, NewPartner, NewPayout, PartnerId, PartnerRecord, PartnerStatus,
    PayoutId, PayoutRecord, RelayCandidate, RelaySessionRecord, RevokeTokenRequest, TokenHash,
    UsageRecord, UsageTotals,
};
use crate::services::metering::UsageCharge;

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Everything needed to apply one metered exchange to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementDraft {
    pub partner_id: PartnerId,
    pub contributor_id: ContributorId,
    pub target_url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub response_status: u16,
    pub response_size: u64,
    pub charge: UsageCharge,
    pub recorded_at: DateTime<Utc>,
}

/// State of the ledger right after a settlement committed.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReceipt {
    pub usage_record_id: i64,
    pub session_id: i64,
    pub partner_balance: f64,
    pub contributor_total_earned: f64,
}

/// Why a settlement was refused. No row is touched when any of these is
/// returned.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementRejection {
    PartnerMissing,
    PartnerInactive(PartnerStatus),
    NoActiveSession,
    BalanceExhausted { balance: f64 },
    InsufficientBalance { required: f64, available: f64 },
}

/// Outcome of trying to reserve earnings for a new payout.
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    Reserved(PayoutRecord),
    Insufficient { available: f64 },
}

#[async_trait]
pub trait PartnerStore: Send + Sync {
    async fn insert_partner(&self, partner: NewPartner) -> StorageResult<PartnerRecord>;
    async fn find_partner(&self, id: &PartnerId) -> StorageResult<Option<PartnerRecord>>;
    async fn find_partner_by_api_key(&self, api_key: &str)
        -> StorageResult<Option<PartnerRecord>>;
    async fn update_partner_status(
        &self,
        id: &PartnerId,
        status: PartnerStatus,
    ) -> StorageResult<Option<PartnerRecord>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Deactivates every active session of the contributor and opens a new
    /// one, atomically.
    async fn activate_session(
        &self,
        contributor: &ContributorId,
        bandwidth_limit_gb: f64,
        started_at: DateTime<Utc>,
    ) -> StorageResult<RelaySessionRecord>;
    async fn deactivate_sessions(
        &self,
        contributor: &ContributorId,
        stopped_at: DateTime<Utc>,
    ) -> StorageResult<u64>;
    async fn find_active_session(
        &self,
        contributor: &ContributorId,
    ) -> StorageResult<Option<RelaySessionRecord>>;
    async fn list_relay_candidates(
        &self,
        min_headroom_mb: f64,
        limit: u64,
    ) -> StorageResult<Vec<RelayCandidate>>;
    /// Megabytes relayed by sessions started at or after `since`.
    async fn data_shared_since(
        &self,
        contributor: &ContributorId,
        since: DateTime<Utc>,
    ) -> StorageResult<f64>;
}

#[async_trait]
pub trait EarningsStore: Send + Sync {
    async fn ensure_earnings(
        &self,
        contributor: &ContributorId,
        at: DateTime<Utc>,
    ) -> StorageResult<EarningsRecord>;
    async fn find_earnings(
        &self,
        contributor: &ContributorId,
    ) -> StorageResult<Option<EarningsRecord>>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn usage_totals(
        &self,
        partner: &PartnerId,
        window: &DateWindow,
    ) -> StorageResult<UsageTotals>;
    async fn list_usage(
        &self,
        partner: &PartnerId,
        window: &DateWindow,
        limit: u64,
    ) -> StorageResult<Vec<UsageRecord>>;
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Re-checks every precondition and applies the partner debit, the
    /// contributor credit, the session counter bump and the usage record in
    /// one transaction.
    async fn apply_settlement(
        &self,
        draft: SettlementDraft,
    ) -> StorageResult<Result<SettlementReceipt, SettlementRejection>>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Sum of the contributor's `pending` and `processing` payouts.
    async fn reserved_amount(&self, contributor: &ContributorId) -> StorageResult<f64>;
    /// Inserts the payout only if it fits in the contributor's available
    /// earnings at commit time.
    async fn reserve_payout(&self, payout: NewPayout) -> StorageResult<ReservationOutcome>;
    /// `processing → completed` plus the earnings debit (floored at zero).
    /// `None` when the payout is missing or no longer `processing`.
    async fn complete_payout(
        &self,
        id: &PayoutId,
        transaction_id: &str,
        processed_at: DateTime<Utc>,
    ) -> StorageResult<Option<PayoutRecord>>;
    /// `processing → failed`. `None` when the payout is missing or no longer
    /// `processing`.
    async fn fail_payout(
        &self,
        id: &PayoutId,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> StorageResult<Option<PayoutRecord>>;
    async fn find_payout(&self, id: &PayoutId) -> StorageResult<Option<PayoutRecord>>;
    async fn list_payouts(
        &self,
        contributor: &ContributorId,
        limit: u64,
    ) -> StorageResult<Vec<PayoutRecord>>;
    async fn list_stale_processing(
        &self,
        created_before: DateTime<Utc>,
        limit: u64,
    ) -> StorageResult<Vec<PayoutRecord>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(
        &self,
        token: NewContributorToken,
    ) -> StorageResult<ContributorTokenRecord>;
    async fn find_token(&self, token: &TokenHash)
        -> StorageResult<Option<ContributorTokenRecord>>;
    async fn revoke_token(
        &self,
        request: RevokeTokenRequest,
    ) -> StorageResult<Option<ContributorTokenRecord>>;
}

/// The full ledger surface, implemented by the SeaORM storage handle.
pub trait LedgerStore:
    PartnerStore + SessionStore + EarningsStore + UsageStore + SettlementStore + PayoutStore + TokenStore
{
}

impl<T> LedgerStore for T where
    T: PartnerStore
        + SessionStore
        + EarningsStore
        + UsageStore
        + SettlementStore
        + PayoutStore
        + TokenStore
{
}
