//! Contributor payouts: eligibility, reservation against earnings, the rail
//! call and the bookkeeping that follows it.
//!
//! A payout holds its amount against the contributor's earnings from the
//! moment it is reserved (`pending` or `processing`). Earnings are only
//! debited when the payout completes, so a failed payout releases its hold
//! without touching `total_earned`.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use metrics::counter;
use tracing::{error, info, warn};

use crate::{
    error::LedgerError,
    model::{
        ContributorId, NewPayout, PaymentDetails, PaymentMethod, PayoutId, PayoutRecord,
        PayoutStatus, CREDITS_PER_USD, MINIMUM_PAYOUT,
    },
    services::{
        locks::LedgerLocks,
        metering::format_dollars,
        rail::{PaymentRail, PayoutInstruction, RailError, RailStatus},
    },
    storage::{EarningsStore, PayoutStore, ReservationOutcome},
};

pub const DEFAULT_HISTORY_LIMIT: u64 = 10;
pub const MAX_HISTORY_LIMIT: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutEligibility {
    pub eligible: bool,
    pub available: f64,
    pub minimum: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRequest {
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub payment_details: PaymentDetails,
}

/// What the contributor is told after asking for a payout.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutReceipt {
    pub payout_id: PayoutId,
    pub transaction_id: Option<String>,
    pub amount: f64,
    pub credits: f64,
    pub status: PayoutStatus,
}

/// Result of feeding a rail-side status back into the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Completed(PayoutRecord),
    Failed(PayoutRecord),
    /// The rail has no final answer yet.
    Unchanged,
    /// The payout left `processing` through another path first.
    AlreadyFinal,
}

#[derive(Clone)]
pub struct PayoutEngine<S> {
    store: S,
    rail: Option<Arc<dyn PaymentRail>>,
    locks: LedgerLocks,
    rail_timeout: Duration,
}

impl<S> PayoutEngine<S>
where
    S: EarningsStore + PayoutStore,
{
    pub fn new(
        store: S,
        rail: Option<Arc<dyn PaymentRail>>,
        locks: LedgerLocks,
        rail_timeout: Duration,
    ) -> Self {
        Self {
            store,
            rail,
            locks,
            rail_timeout,
        }
    }

    pub async fn eligibility(
        &self,
        contributor: &ContributorId,
    ) -> Result<PayoutEligibility, LedgerError> {
        let Some(earnings) = self.store.find_earnings(contributor).await? else {
            return Ok(PayoutEligibility {
                eligible: false,
                available: 0.0,
                minimum: MINIMUM_PAYOUT,
                message: "No earnings found".into(),
            });
        };
        let reserved = self.store.reserved_amount(contributor).await?;
        let available = (earnings.total_earned - reserved).max(0.0);
        let eligible = available >= MINIMUM_PAYOUT;
        let message = if eligible {
            "Eligible for payout".to_string()
        } else {
            format!(
                "Need ${} more to reach minimum",
                format_dollars(MINIMUM_PAYOUT - available)
            )
        };

        Ok(PayoutEligibility {
            eligible,
            available,
            minimum: MINIMUM_PAYOUT,
            message,
        })
    }

    /// Reserves the amount and, for rails that settle inline, sends it.
    ///
    /// A rail timeout leaves the payout `processing` for reconciliation and
    /// is reported as such; any other rail error marks it `failed`.
    pub async fn request_payout(
        &self,
        contributor: &ContributorId,
        request: PayoutRequest,
    ) -> Result<PayoutReceipt, LedgerError> {
        if !request.amount.is_finite() || request.amount < MINIMUM_PAYOUT {
            return Err(LedgerError::validation(format!(
                "Minimum payout is ${}",
                format_dollars(MINIMUM_PAYOUT)
            )));
        }
        let recipient = recipient_for(&request)?;
        let synchronous = request.payment_method.is_synchronous();
        let rail = if synchronous {
            Some(self.rail.clone().ok_or_else(|| {
                LedgerError::ExternalService("payout rail is not configured".into())
            })?)
        } else {
            None
        };

        let payout = {
            let _guard = self.locks.contributor(contributor).await;
            let eligibility = self.eligibility(contributor).await?;
            if request.amount > eligibility.available {
                return Err(exceeds_available(eligibility.available));
            }

            let id = PayoutId::generate()
                .map_err(|err| LedgerError::ExternalService(err.to_string()))?;
            let status = if synchronous {
                PayoutStatus::Processing
            } else {
                PayoutStatus::Pending
            };
            let draft = NewPayout {
                id,
                contributor_id: contributor.clone(),
                amount: request.amount,
                credits: request.amount * CREDITS_PER_USD,
                status,
                payment_method: request.payment_method,
                payment_details: request.payment_details.clone(),
                created_at: Utc::now(),
            };
            match self.store.reserve_payout(draft).await? {
                ReservationOutcome::Reserved(payout) => payout,
                ReservationOutcome::Insufficient { available } => {
                    return Err(exceeds_available(available));
                }
            }
        };
        counter!("payouts_total", "stage" => "reserved", "method" => payout.payment_method.to_string())
            .increment(1);
        info!(
            payout = %payout.id,
            contributor = %contributor,
            amount = payout.amount,
            method = %payout.payment_method,
            "payout reserved"
        );

        let Some(rail) = rail else {
            return Ok(receipt(&payout));
        };

        let instruction =
            PayoutInstruction::new(payout.id.clone(), contributor.clone(), payout.amount, recipient);
        let sent = match tokio::time::timeout(self.rail_timeout, rail.send(&instruction)).await {
            Ok(result) => result,
            Err(_) => Err(RailError::Timeout),
        };

        match sent {
            Ok(rail_receipt) => {
                let status = RailStatus::Completed {
                    transaction_id: rail_receipt.transaction_id,
                };
                match self.apply_rail_status(&payout, status).await? {
                    SettleOutcome::Completed(record) => Ok(receipt(&record)),
                    _ => self.current_receipt(&payout.id).await,
                }
            }
            Err(err) if err.is_ambiguous() => {
                counter!("payouts_total", "stage" => "ambiguous", "method" => payout.payment_method.to_string())
                    .increment(1);
                warn!(payout = %payout.id, error = %err, "payout outcome unknown; left for reconciliation");
                Ok(receipt(&payout))
            }
            Err(err) => {
                let reason = err.to_string();
                self.apply_rail_status(
                    &payout,
                    RailStatus::Failed {
                        reason: reason.clone(),
                    },
                )
                .await?;
                Err(LedgerError::ExternalService(format!(
                    "payout {} failed: {reason}",
                    payout.id
                )))
            }
        }
    }

    /// Moves a `processing` payout to its final state according to the rail.
    pub async fn apply_rail_status(
        &self,
        payout: &PayoutRecord,
        status: RailStatus,
    ) -> Result<SettleOutcome, LedgerError> {
        let now = Utc::now();
        let _guard = self.locks.contributor(&payout.contributor_id).await;
        let outcome = match status {
            RailStatus::Completed { transaction_id } => {
                match self
                    .store
                    .complete_payout(&payout.id, &transaction_id, now)
                    .await?
                {
                    Some(record) => {
                        counter!("payouts_total", "stage" => "completed", "method" => record.payment_method.to_string())
                            .increment(1);
                        info!(payout = %record.id, transaction = %transaction_id, "payout completed");
                        SettleOutcome::Completed(record)
                    }
                    None => SettleOutcome::AlreadyFinal,
                }
            }
            RailStatus::Failed { reason } => {
                match self.store.fail_payout(&payout.id, &reason, now).await? {
                    Some(record) => {
                        counter!("payouts_total", "stage" => "failed", "method" => record.payment_method.to_string())
                            .increment(1);
                        error!(payout = %record.id, reason = %reason, "payout failed");
                        SettleOutcome::Failed(record)
                    }
                    None => SettleOutcome::AlreadyFinal,
                }
            }
            RailStatus::InFlight | RailStatus::Unknown => SettleOutcome::Unchanged,
        };
        Ok(outcome)
    }

    /// Asks the rail about a stuck payout and applies its answer.
    pub async fn reconcile(&self, payout: &PayoutRecord) -> Result<SettleOutcome, LedgerError> {
        let Some(rail) = self.rail.as_ref() else {
            return Ok(SettleOutcome::Unchanged);
        };
        let status = match tokio::time::timeout(self.rail_timeout, rail.status(&payout.id)).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => return Err(LedgerError::ExternalService(err.to_string())),
            Err(_) => return Err(LedgerError::ExternalService(RailError::Timeout.to_string())),
        };
        self.apply_rail_status(payout, status).await
    }

    pub async fn history(
        &self,
        contributor: &ContributorId,
        limit: Option<u64>,
    ) -> Result<Vec<PayoutRecord>, LedgerError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.store.list_payouts(contributor, limit).await?)
    }

    async fn current_receipt(&self, id: &PayoutId) -> Result<PayoutReceipt, LedgerError> {
        self.store
            .find_payout(id)
            .await?
            .map(|record| receipt(&record))
            .ok_or_else(|| LedgerError::NotFound(format!("payout {id}")))
    }
}

fn receipt(payout: &PayoutRecord) -> PayoutReceipt {
    PayoutReceipt {
        payout_id: payout.id.clone(),
        transaction_id: payout.transaction_id.clone(),
        amount: payout.amount,
        credits: payout.credits,
        status: payout.status,
    }
}

fn exceeds_available(available: f64) -> LedgerError {
    LedgerError::validation(format!(
        "Requested amount exceeds available balance of ${}",
        format_dollars(available)
    ))
}

/// The destination for the chosen method, which must be present.
fn recipient_for(request: &PayoutRequest) -> Result<String, LedgerError> {
    let details = &request.payment_details;
    let (field, value) = match request.payment_method {
        PaymentMethod::Paypal => ("paypalEmail", details.paypal_email.as_deref()),
        PaymentMethod::Crypto => ("cryptoWallet", details.crypto_wallet.as_deref()),
        PaymentMethod::Bank => ("bankAccount", details.bank_account.as_deref()),
    };
    let value = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            LedgerError::validation(format!(
                "paymentDetails.{field} is required for {} payouts",
                request.payment_method
            ))
        })?;
    if request.payment_method == PaymentMethod::Paypal && !value.contains('@') {
        return Err(LedgerError::validation(
            "paymentDetails.paypalEmail must be an email address",
        ));
    }
    Ok(value.to_owned())
}
