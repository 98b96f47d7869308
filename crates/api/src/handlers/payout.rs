use std::str::FromStr;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use bandshare_domain::model::{PaymentDetails, PaymentMethod, PayoutRecord, PayoutStatus};
use bandshare_domain::services::payout::{PayoutReceipt, PayoutRequest};
use bandshare_domain::LedgerError;

use crate::state::AppState;

use super::{authenticate_contributor, json_body, ok, ApiError};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityView {
    pub eligible: bool,
    pub available: f64,
    pub minimum: f64,
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequestBody {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_details: PaymentDetails,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutView {
    pub payout_id: String,
    pub transaction_id: Option<String>,
    pub amount: f64,
    pub credits: f64,
    pub status: PayoutStatus,
}

impl From<PayoutReceipt> for PayoutView {
    fn from(receipt: PayoutReceipt) -> Self {
        Self {
            payout_id: receipt.payout_id.into_inner(),
            transaction_id: receipt.transaction_id,
            amount: receipt.amount,
            credits: receipt.credits,
            status: receipt.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutHistoryEntry {
    pub id: String,
    pub amount: f64,
    pub credits: f64,
    pub status: PayoutStatus,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<PayoutRecord> for PayoutHistoryEntry {
    fn from(record: PayoutRecord) -> Self {
        Self {
            id: record.id.into_inner(),
            amount: record.amount,
            credits: record.credits,
            status: record.status,
            payment_method: record.payment_method,
            transaction_id: record.transaction_id,
            error_message: record.error_message,
            created_at: record.created_at,
            processed_at: record.processed_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

pub async fn payout_eligibility_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let contributor = authenticate_contributor(&state, &req).await?;
    let eligibility = state.payouts().eligibility(&contributor).await?;
    Ok(ok(EligibilityView {
        eligible: eligibility.eligible,
        available: eligibility.available,
        minimum: eligibility.minimum,
        message: eligibility.message,
    }))
}

pub async fn payout_request_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let contributor = authenticate_contributor(&state, &req).await?;
    let request = payout_request(json_body(&body)?)?;
    let method = request.payment_method;

    match state.payouts().request_payout(&contributor, request).await {
        Ok(receipt) => {
            counter!("api_payout_requests_total", "method" => method.to_string(), "result" => receipt.status.to_string())
                .increment(1);
            Ok(ok(PayoutView::from(receipt)))
        }
        Err(err) => {
            counter!("api_payout_requests_total", "method" => method.to_string(), "result" => err.kind())
                .increment(1);
            Err(err.into())
        }
    }
}

pub async fn payout_history_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let contributor = authenticate_contributor(&state, &req).await?;
    let history = state.payouts().history(&contributor, query.limit).await?;
    Ok(ok(history
        .into_iter()
        .map(PayoutHistoryEntry::from)
        .collect::<Vec<_>>()))
}

fn payout_request(body: PayoutRequestBody) -> Result<PayoutRequest, LedgerError> {
    let amount = body
        .amount
        .ok_or_else(|| LedgerError::validation("amount is required"))?;
    let payment_method = match body.payment_method.as_deref().map(str::trim) {
        None | Some("") => return Err(LedgerError::validation("paymentMethod is required")),
        Some(raw) => PaymentMethod::from_str(&raw.to_ascii_lowercase())
            .map_err(|_| LedgerError::validation(format!("Unsupported payment method: {raw}")))?,
    };
    Ok(PayoutRequest {
        amount,
        payment_method,
        payment_details: body.payment_details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_amount_and_known_method() {
        assert!(payout_request(PayoutRequestBody::default()).is_err());
        let err = payout_request(PayoutRequestBody {
            amount: Some(10.0),
            payment_method: Some("cheque".into()),
            ..PayoutRequestBody::default()
        })
        .expect_err("unknown method");
        assert_eq!(err, LedgerError::validation("Unsupported payment method: cheque"));

        let request = payout_request(PayoutRequestBody {
            amount: Some(10.0),
            payment_method: Some("PayPal".into()),
            ..PayoutRequestBody::default()
        })
        .expect("valid");
        assert_eq!(request.payment_method, PaymentMethod::Paypal);
    }
}
