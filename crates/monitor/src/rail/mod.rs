//! HTTP client for the payout rail, speaking the batch-payout dialect used by
//! PayPal-style processors.
//!
//! Rail contract: our payout id is sent as `sender_batch_id`, the rail
//! rejects a second batch with the same id, and
//! `GET /v1/payments/payouts/{sender_batch_id}` answers with the batch header
//! for it (404 when the rail never saw the id). Stuck payouts may never have
//! received a rail-side `payout_batch_id`, so the sender id is the only key
//! reconciliation can rely on. A rail that only indexes by its own batch id
//! needs a gateway in front that provides this lookup.

use async_trait::async_trait;
use bandshare_domain::{
    config::PayoutRailConfig,
    model::PayoutId,
    services::{
        metering::format_dollars,
        rail::{PaymentRail, PayoutInstruction, RailError, RailReceipt, RailStatus},
    },
};
use metrics::counter;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

mod types;

use types::{
    Money, PayoutBatchRequest, PayoutBatchResponse, PayoutItem, RailErrorBody, SenderBatchHeader,
};

const PAYOUTS_PATH: &str = "/v1/payments/payouts";

#[derive(Clone)]
pub struct HttpPayoutRail {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpPayoutRail {
    pub fn new(config: &PayoutRailConfig) -> Result<Self, RailError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| RailError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().to_string(),
        })
    }

    fn payouts_url(&self) -> String {
        format!("{}{PAYOUTS_PATH}", self.base_url)
    }
}

#[async_trait]
impl PaymentRail for HttpPayoutRail {
    async fn send(&self, instruction: &PayoutInstruction) -> Result<RailReceipt, RailError> {
        let body = batch_request(instruction);
        let response = self
            .client
            .post(self.payouts_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_success() {
            let parsed: PayoutBatchResponse = response.json().await.map_err(|err| {
                counter!("payout_rail_calls_total", "call" => "send", "result" => "unconfirmed")
                    .increment(1);
                warn!(payout = %instruction.payout_id, %status, error = %err, "rail accepted payout with an unreadable answer");
                classify_accepted(err)
            })?;
            counter!("payout_rail_calls_total", "call" => "send", "result" => "ok").increment(1);
            debug!(
                payout = %instruction.payout_id,
                batch = %parsed.batch_header.payout_batch_id,
                "rail accepted payout"
            );
            return Ok(RailReceipt {
                transaction_id: parsed.batch_header.payout_batch_id,
            });
        }

        let reason = error_reason(status, response.text().await.unwrap_or_default());
        if status.is_client_error() {
            counter!("payout_rail_calls_total", "call" => "send", "result" => "rejected")
                .increment(1);
            warn!(payout = %instruction.payout_id, %status, %reason, "rail refused payout");
            Err(RailError::Rejected(reason))
        } else {
            counter!("payout_rail_calls_total", "call" => "send", "result" => "unconfirmed")
                .increment(1);
            warn!(payout = %instruction.payout_id, %status, %reason, "rail failed after receiving payout");
            Err(RailError::Unconfirmed(reason))
        }
    }

    async fn status(&self, payout_id: &PayoutId) -> Result<RailStatus, RailError> {
        let response = self
            .client
            .get(format!("{}/{}", self.payouts_url(), payout_id.as_str()))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            counter!("payout_rail_calls_total", "call" => "status", "result" => "unknown")
                .increment(1);
            return Ok(RailStatus::Unknown);
        }
        if !status.is_success() {
            counter!("payout_rail_calls_total", "call" => "status", "result" => "error")
                .increment(1);
            let reason = error_reason(status, response.text().await.unwrap_or_default());
            return Err(RailError::Transport(reason));
        }

        let parsed: PayoutBatchResponse = response.json().await.map_err(classify)?;
        counter!("payout_rail_calls_total", "call" => "status", "result" => "ok").increment(1);
        Ok(batch_status(parsed))
    }
}

fn batch_request(instruction: &PayoutInstruction) -> PayoutBatchRequest<'_> {
    PayoutBatchRequest {
        sender_batch_header: SenderBatchHeader {
            sender_batch_id: instruction.payout_id.as_str(),
            email_subject: instruction.subject,
            email_message: instruction.note,
        },
        items: vec![PayoutItem {
            recipient_type: "EMAIL",
            amount: Money {
                value: format_dollars(instruction.amount),
                currency: instruction.currency,
            },
            receiver: &instruction.recipient,
            note: instruction.note,
            sender_item_id: instruction.payout_id.as_str(),
        }],
    }
}

/// Maps the rail's batch status onto the ledger's view of it.
fn batch_status(response: PayoutBatchResponse) -> RailStatus {
    let header = response.batch_header;
    match header.batch_status.as_deref().map(str::to_ascii_uppercase).as_deref() {
        Some("SUCCESS") => RailStatus::Completed {
            transaction_id: header.payout_batch_id,
        },
        Some(state @ ("DENIED" | "CANCELED" | "FAILED")) => RailStatus::Failed {
            reason: format!("batch {} {}", header.payout_batch_id, state.to_lowercase()),
        },
        Some("PENDING" | "PROCESSING" | "NEW") => RailStatus::InFlight,
        _ => RailStatus::Unknown,
    }
}

fn error_reason(status: StatusCode, body: String) -> String {
    let parsed: RailErrorBody = serde_json::from_str(&body).unwrap_or_default();
    match (parsed.name, parsed.message) {
        (_, Some(message)) => message,
        (Some(name), None) => name,
        (None, None) if body.trim().is_empty() => format!("rail responded with {status}"),
        (None, None) => body,
    }
}

/// Only errors raised before the request left the client are definite;
/// anything later may have reached the rail.
fn classify(err: reqwest::Error) -> RailError {
    if err.is_timeout() {
        RailError::Timeout
    } else if err.is_connect() || err.is_builder() {
        RailError::Transport(err.to_string())
    } else {
        RailError::Unconfirmed(err.to_string())
    }
}

/// The rail answered 2xx but the body could not be read.
fn classify_accepted(err: reqwest::Error) -> RailError {
    if err.is_timeout() {
        RailError::Timeout
    } else {
        RailError::Unconfirmed(err.to_string())
    }
}
