use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ContributorId, PayoutId};

pub const PAYOUT_CURRENCY: &str = "USD";
pub const PAYOUT_SUBJECT: &str = "BandShare earnings payout";
pub const PAYOUT_NOTE: &str = "Thank you for sharing your bandwidth!";

/// One transfer handed to the external payment rail. `payout_id` doubles as
/// the rail-side idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutInstruction {
    pub payout_id: PayoutId,
    pub contributor_id: ContributorId,
    pub amount: f64,
    pub currency: &'static str,
    pub recipient: String,
    pub subject: &'static str,
    pub note: &'static str,
}

impl PayoutInstruction {
    pub fn new(
        payout_id: PayoutId,
        contributor_id: ContributorId,
        amount: f64,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            payout_id,
            contributor_id,
            amount,
            currency: PAYOUT_CURRENCY,
            recipient: recipient.into(),
            subject: PAYOUT_SUBJECT,
            note: PAYOUT_NOTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailReceipt {
    pub transaction_id: String,
}

/// Rail-side view of a payout, used when reconciling stuck attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RailStatus {
    Completed { transaction_id: String },
    Failed { reason: String },
    InFlight,
    Unknown,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RailError {
    /// The rail refused the transfer; nothing was sent.
    #[error("payout rejected: {0}")]
    Rejected(String),
    /// The request never reached the rail; nothing was sent.
    #[error("payout rail transport error: {0}")]
    Transport(String),
    /// The request reached the rail but its answer could not be read or was a
    /// server error; the transfer may or may not have gone out.
    #[error("payout rail outcome unconfirmed: {0}")]
    Unconfirmed(String),
    /// No answer in time; the transfer may or may not have gone out.
    #[error("payout rail timed out")]
    Timeout,
}

impl RailError {
    /// Whether the transfer may have been executed despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, RailError::Timeout | RailError::Unconfirmed(_))
    }
}

#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn send(&self, instruction: &PayoutInstruction) -> Result<RailReceipt, RailError>;
    async fn status(&self, payout_id: &PayoutId) -> Result<RailStatus, RailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_undelivered_or_refused_transfers_are_final() {
        assert!(RailError::Timeout.is_ambiguous());
        assert!(RailError::Unconfirmed("503 Service Unavailable".into()).is_ambiguous());
        assert!(!RailError::Rejected("no".into()).is_ambiguous());
        assert!(!RailError::Transport("reset".into()).is_ambiguous());
    }

    #[test]
    fn instruction_carries_fixed_currency_and_note() {
        let instruction =
            PayoutInstruction::new(PayoutId::from("p-1"), ContributorId::from("c-1"), 6.5, "a@b.c");
        assert_eq!(instruction.currency, "USD");
        assert_eq!(instruction.note, PAYOUT_NOTE);
        assert_eq!(instruction.recipient, "a@b.c");
    }
}
