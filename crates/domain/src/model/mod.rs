//! Ledger records and value types shared across the API, storage and monitor
//! crates.

mod credentials;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use credentials::*;

/// Contributor share of every billed exchange.
pub const USER_SHARE: f64 = 0.70;
/// Platform share of every billed exchange.
pub const PLATFORM_FEE: f64 = 0.30;
/// Smallest payout (USD) a contributor may request.
pub const MINIMUM_PAYOUT: f64 = 5.0;
/// Fixed exchange rate recorded on each payout: 1 USD = 1000 credits.
pub const CREDITS_PER_USD: f64 = 1000.0;
/// Bandwidth cap assumed for a session when the contributor sets none.
pub const DEFAULT_BANDWIDTH_LIMIT_GB: f64 = 50.0;
/// Default lookback for partner statistics.
pub const DEFAULT_STATS_WINDOW_DAYS: i64 = 30;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a partner account.
    PartnerId
);
string_id!(
    /// Stable identifier of a contributor, assigned by the out-of-scope
    /// account system.
    ContributorId
);
string_id!(
    /// Identifier threaded through every stage of one payout attempt.
    PayoutId
);

impl PartnerId {
    pub fn generate() -> Result<Self, CredentialError> {
        generate_hex_secret(12).map(Self)
    }
}

impl PayoutId {
    pub fn generate() -> Result<Self, CredentialError> {
        generate_hex_secret(12).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PartnerStatus {
    Active,
    Inactive,
    Suspended,
}

/// Partner pricing tiers: $0.10, $0.20 and $0.30 per billed GB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PricingTier {
    Tier1,
    Tier2,
    Tier3,
}

impl PricingTier {
    pub fn price_per_gb(self) -> f64 {
        match self {
            PricingTier::Tier1 => 0.10,
            PricingTier::Tier2 => 0.20,
            PricingTier::Tier3 => 0.30,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PricingTier::Tier1 => "Basic",
            PricingTier::Tier2 => "Premium",
            PricingTier::Tier3 => "Enterprise",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartnerRecord {
    pub id: PartnerId,
    pub name: String,
    pub email: String,
    pub api_key: String,
    pub api_secret_hash: String,
    pub status: PartnerStatus,
    pub pricing_tier: PricingTier,
    pub price_per_gb: f64,
    pub balance: f64,
    pub total_usage_gb: f64,
    pub total_spent: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartnerRecord {
    pub fn is_active(&self) -> bool {
        self.status == PartnerStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPartner {
    pub id: PartnerId,
    pub name: String,
    pub email: String,
    pub api_key: String,
    pub api_secret_hash: String,
    pub pricing_tier: PricingTier,
    pub price_per_gb: f64,
    pub balance: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EarningsRecord {
    pub contributor_id: ContributorId,
    pub today_earned: f64,
    pub today_date: NaiveDate,
    pub total_earned: f64,
    pub updated_at: DateTime<Utc>,
}

impl EarningsRecord {
    /// Earnings credited on `day`; a stale counter from an earlier day reads
    /// as zero.
    pub fn earned_on(&self, day: NaiveDate) -> f64 {
        if self.today_date == day {
            self.today_earned
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelaySessionRecord {
    pub id: i64,
    pub contributor_id: ContributorId,
    pub bandwidth_limit_gb: f64,
    pub bytes_relayed_mb: f64,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RelaySessionRecord {
    pub fn headroom_mb(&self) -> f64 {
        self.bandwidth_limit_gb * 1024.0 - self.bytes_relayed_mb
    }
}

/// An active session offered to the contributor selector.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayCandidate {
    pub contributor_id: ContributorId,
    pub session_id: i64,
    pub headroom_mb: f64,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

/// Immutable audit entry for one billed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub id: i64,
    pub partner_id: PartnerId,
    pub contributor_id: ContributorId,
    pub target_url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub response_status: u16,
    pub response_size: u64,
    pub billed_volume_mb: f64,
    pub cost: f64,
    pub contributor_earnings: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate over a partner's usage records within a window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub total_requests: u64,
    pub total_data_mb: f64,
    pub total_cost: f64,
    pub total_user_earnings: f64,
}

/// Inclusive time window used by statistics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The trailing `days` ending at `now`.
    pub fn trailing_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: now - Duration::days(days),
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    /// Forward-only lifecycle: `pending → processing → completed | failed`.
    pub fn can_advance_to(self, next: PayoutStatus) -> bool {
        matches!(
            (self, next),
            (PayoutStatus::Pending, PayoutStatus::Processing)
                | (PayoutStatus::Processing, PayoutStatus::Completed)
                | (PayoutStatus::Processing, PayoutStatus::Failed)
        )
    }

    /// Payouts in these states hold a reservation against earnings.
    pub fn is_in_flight(self) -> bool {
        matches!(self, PayoutStatus::Pending | PayoutStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Failed)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Paypal,
    Crypto,
    Bank,
}

impl PaymentMethod {
    /// Only the email rail settles inline; the other methods queue for
    /// out-of-band processing.
    pub fn is_synchronous(self) -> bool {
        matches!(self, PaymentMethod::Paypal)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paypal_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRecord {
    pub id: PayoutId,
    pub contributor_id: ContributorId,
    pub amount: f64,
    pub credits: f64,
    pub status: PayoutStatus,
    pub payment_method: PaymentMethod,
    pub payment_details: PaymentDetails,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayout {
    pub id: PayoutId,
    pub contributor_id: ContributorId,
    pub amount: f64,
    pub credits: f64,
    pub status: PayoutStatus,
    pub payment_method: PaymentMethod,
    pub payment_details: PaymentDetails,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContributorToken {
    pub token_hash: TokenHash,
    pub contributor_id: ContributorId,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorTokenRecord {
    pub token_hash: TokenHash,
    pub contributor_id: ContributorId,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

impl ContributorTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeTokenRequest {
    pub token_hash: TokenHash,
    pub reason: Option<String>,
}
