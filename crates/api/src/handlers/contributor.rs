use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::{authenticate_contributor, ok, ApiError};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartSharingRequest {
    #[serde(rename = "bandwidthLimitGB", default)]
    pub bandwidth_limit_gb: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingSession {
    pub session_id: i64,
    #[serde(rename = "bandwidthLimitGB")]
    pub bandwidth_limit_gb: f64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingStopped {
    pub sessions_closed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataShared {
    #[serde(rename = "dataSharedMB")]
    pub data_shared_mb: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EarningsView {
    pub today: f64,
    pub total: f64,
}

/// An absent or empty body starts a session with the default cap.
pub async fn start_sharing_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Option<web::Json<StartSharingRequest>>,
) -> Result<HttpResponse, ApiError> {
    let contributor = authenticate_contributor(&state, &req).await?;
    let limit = payload.and_then(|body| body.into_inner().bandwidth_limit_gb);
    let session = state
        .sharing()
        .start(&contributor, limit, Utc::now())
        .await?;

    Ok(ok(SharingSession {
        session_id: session.id,
        bandwidth_limit_gb: session.bandwidth_limit_gb,
        started_at: session.started_at,
    }))
}

pub async fn stop_sharing_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let contributor = authenticate_contributor(&state, &req).await?;
    let closed = state.sharing().stop(&contributor, Utc::now()).await?;
    Ok(ok(SharingStopped {
        sessions_closed: closed,
    }))
}

pub async fn data_shared_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let contributor = authenticate_contributor(&state, &req).await?;
    let data_shared_mb = state
        .sharing()
        .data_shared_today(&contributor, Utc::now())
        .await?;
    Ok(ok(DataShared { data_shared_mb }))
}

pub async fn earnings_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let contributor = authenticate_contributor(&state, &req).await?;
    let summary = state.sharing().earnings(&contributor, Utc::now()).await?;
    Ok(ok(EarningsView {
        today: summary.today_earned,
        total: summary.total_earned,
    }))
}
