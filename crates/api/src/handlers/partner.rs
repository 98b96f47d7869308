use std::{collections::BTreeMap, str::FromStr};

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bandshare_domain::model::{
    ContributorId, DateWindow, HttpMethod, UsageTotals, DEFAULT_STATS_WINDOW_DAYS,
};
use bandshare_domain::services::{metering::format_amount, relay::RelayRequest};
use bandshare_domain::storage::UsageStore;
use bandshare_domain::LedgerError;

use crate::state::AppState;

use super::{authenticate_partner, json_body, ok, ApiError};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRequestBody {
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub contributor_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartnerRequestResponse {
    pub success: bool,
    pub data: Value,
    pub status: u16,
    pub metadata: UsageMetadata,
}

/// Billing figures for one exchange, as 4-decimal strings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(rename = "dataUsedMB")]
    pub data_used_mb: String,
    pub cost: String,
    pub user_earnings: String,
}

pub async fn partner_request_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let partner = authenticate_partner(&state, &req).await?;
    let payload: PartnerRequestBody = json_body(&body)?;
    let preferred = payload
        .contributor_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ContributorId::from);
    let request = relay_request(payload)?;

    let exchange = match state
        .settlement()
        .relay_and_settle(&partner.id, preferred, request)
        .await
    {
        Ok(exchange) => exchange,
        Err(err) => {
            counter!("api_partner_requests_total", "result" => err.kind()).increment(1);
            return Err(err.into());
        }
    };
    counter!("api_partner_requests_total", "result" => "settled").increment(1);

    Ok(HttpResponse::Ok().json(PartnerRequestResponse {
        success: true,
        data: exchange.data,
        status: exchange.status,
        metadata: UsageMetadata {
            data_used_mb: format_amount(exchange.charge.billed_volume_mb),
            cost: format_amount(exchange.charge.cost),
            user_earnings: format_amount(exchange.charge.contributor_earnings),
        },
    }))
}

fn relay_request(payload: PartnerRequestBody) -> Result<RelayRequest, LedgerError> {
    let method = match payload.method.as_deref().map(str::trim) {
        None | Some("") => HttpMethod::default(),
        Some(raw) => HttpMethod::from_str(raw)
            .map_err(|_| LedgerError::validation(format!("Unsupported method: {raw}")))?,
    };
    let body = payload.body.and_then(|body| match body {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    });

    Ok(RelayRequest {
        target_url: payload.target_url.unwrap_or_default(),
        method,
        headers: payload.headers,
        body,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartnerStats {
    pub partner: PartnerSummary,
    pub usage: UsageSummary,
    pub window: WindowSummary,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerSummary {
    pub id: String,
    pub name: String,
    pub pricing_tier: String,
    pub price_per_gb: f64,
    pub balance: f64,
    #[serde(rename = "totalUsageGB")]
    pub total_usage_gb: f64,
    pub total_spent: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_requests: u64,
    #[serde(rename = "totalDataMB")]
    pub total_data_mb: f64,
    pub total_cost: f64,
    pub total_user_earnings: f64,
}

impl From<UsageTotals> for UsageSummary {
    fn from(totals: UsageTotals) -> Self {
        Self {
            total_requests: totals.total_requests,
            total_data_mb: totals.total_data_mb,
            total_cost: totals.total_cost,
            total_user_earnings: totals.total_user_earnings,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

pub async fn partner_stats_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse, ApiError> {
    let partner = authenticate_partner(&state, &req).await?;
    let window = stats_window(&query, Utc::now())?;
    let totals = state.storage().usage_totals(&partner.id, &window).await?;
    counter!("api_partner_stats_total").increment(1);

    Ok(ok(PartnerStats {
        partner: PartnerSummary {
            id: partner.id.into_inner(),
            name: partner.name,
            pricing_tier: partner.pricing_tier.label().to_string(),
            price_per_gb: partner.price_per_gb,
            balance: partner.balance,
            total_usage_gb: partner.total_usage_gb,
            total_spent: partner.total_spent,
        },
        usage: totals.into(),
        window: WindowSummary {
            start_date: window.start,
            end_date: window.end,
        },
    }))
}

/// Resolves the requested window, defaulting to the trailing 30 days. A bare
/// date covers that whole UTC day.
fn stats_window(query: &StatsQuery, now: DateTime<Utc>) -> Result<DateWindow, LedgerError> {
    let default = DateWindow::trailing_days(now, DEFAULT_STATS_WINDOW_DAYS);
    let start = match query.start_date.as_deref() {
        Some(raw) => parse_bound(raw, "startDate", NaiveTime::MIN)?,
        None => default.start,
    };
    let end = match query.end_date.as_deref() {
        Some(raw) => parse_bound(raw, "endDate", end_of_day())?,
        None => default.end,
    };
    if start > end {
        return Err(LedgerError::validation("startDate must not be after endDate"));
    }
    Ok(DateWindow::new(start, end))
}

fn parse_bound(
    raw: &str,
    field: &str,
    time_for_dates: NaiveTime,
) -> Result<DateTime<Utc>, LedgerError> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(time_for_dates).and_utc())
        .map_err(|_| LedgerError::validation(format!("Invalid {field}: {raw}")))
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn method_defaults_to_get_and_rejects_unknown_verbs() {
        let request = relay_request(PartnerRequestBody {
            target_url: Some("https://example.com".into()),
            ..PartnerRequestBody::default()
        })
        .expect("valid request");
        assert_eq!(request.method, HttpMethod::Get);

        let err = relay_request(PartnerRequestBody {
            method: Some("PATCH".into()),
            ..PartnerRequestBody::default()
        })
        .expect_err("unsupported verb");
        assert_eq!(err, LedgerError::validation("Unsupported method: PATCH"));
    }

    #[test]
    fn structured_bodies_are_forwarded_as_json_text() {
        let request = relay_request(PartnerRequestBody {
            target_url: Some("https://example.com".into()),
            method: Some("post".into()),
            body: Some(json!({"q": 1})),
            ..PartnerRequestBody::default()
        })
        .expect("valid request");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.body.as_deref(), Some(r#"{"q":1}"#));
    }

    #[test]
    fn stats_window_accepts_dates_and_timestamps() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();
        let window = stats_window(&StatsQuery::default(), now).unwrap();
        assert_eq!(window.end, now);
        assert_eq!(window.start, now - chrono::Duration::days(30));

        let window = stats_window(
            &StatsQuery {
                start_date: Some("2024-05-01".into()),
                end_date: Some("2024-05-02T06:00:00Z".into()),
            },
            now,
        )
        .unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap());

        let window = stats_window(
            &StatsQuery {
                start_date: None,
                end_date: Some("2024-05-31".into()),
            },
            now,
        )
        .unwrap();
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 5, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn inverted_or_malformed_windows_are_rejected() {
        let now = Utc::now();
        assert!(stats_window(
            &StatsQuery {
                start_date: Some("2024-05-02".into()),
                end_date: Some("2024-05-01".into()),
            },
            now,
        )
        .is_err());
        assert!(stats_window(
            &StatsQuery {
                start_date: Some("yesterday".into()),
                end_date: None,
            },
            now,
        )
        .is_err());
    }
}
