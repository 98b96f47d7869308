//! Turns relayed byte counts into billed volume, partner cost and the
//! contributor's share. Every engine and every report uses these functions so
//! the numbers agree everywhere.

use crate::model::USER_SHARE;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
pub const MB_PER_GB: f64 = 1024.0;

/// Result of metering one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageCharge {
    pub billed_volume_mb: f64,
    pub billed_volume_gb: f64,
    pub cost: f64,
    pub contributor_earnings: f64,
}

impl UsageCharge {
    /// Whatever the contributor does not receive. Computed as a difference so
    /// `contributor_earnings + platform_fee == cost` holds exactly.
    pub fn platform_fee(&self) -> f64 {
        self.cost - self.contributor_earnings
    }
}

/// Bills `request_bytes + response_bytes` at `price_per_gb`.
///
/// Negative or non-finite prices bill as zero.
pub fn meter(request_bytes: u64, response_bytes: u64, price_per_gb: f64) -> UsageCharge {
    let price = if price_per_gb.is_finite() {
        price_per_gb.max(0.0)
    } else {
        0.0
    };
    let total_bytes = request_bytes.saturating_add(response_bytes);
    let billed_volume_mb = total_bytes as f64 / BYTES_PER_MB;
    let billed_volume_gb = billed_volume_mb / MB_PER_GB;
    let cost = billed_volume_gb * price;

    UsageCharge {
        billed_volume_mb,
        billed_volume_gb,
        cost,
        contributor_earnings: cost * USER_SHARE,
    }
}

/// Wire rendering for monetary and volume fields.
pub fn format_amount(value: f64) -> String {
    format!("{value:.4}")
}

/// Rounds to cents for human-facing messages.
pub fn format_dollars(value: f64) -> String {
    format!("{value:.2}")
}
