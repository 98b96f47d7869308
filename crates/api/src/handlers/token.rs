use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

use bandshare_domain::model::{ContributorTokenRecord, RevokeTokenRequest, TokenHash};
use bandshare_domain::storage::TokenStore;
use bandshare_domain::LedgerError;

use crate::state::AppState;

use super::{ok, ApiError};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenState {
    Active,
    Revoked,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatusResponse {
    pub status: TokenState,
    pub contributor_id: String,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

impl From<ContributorTokenRecord> for TokenStatusResponse {
    fn from(record: ContributorTokenRecord) -> Self {
        Self {
            status: if record.is_revoked() {
                TokenState::Revoked
            } else {
                TokenState::Active
            },
            contributor_id: record.contributor_id.into_inner(),
            issued_at: record.issued_at,
            revoked_at: record.revoked_at,
            revoke_reason: record.revoke_reason,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Revokes a contributor bearer token. Revoking twice keeps the first
/// revocation.
pub async fn revoke_token_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: Option<web::Json<RevokeRequest>>,
) -> Result<HttpResponse, ApiError> {
    let hash = TokenHash::of(path.into_inner().trim());
    let reason = payload.and_then(|body| body.into_inner().reason);
    let record = match state
        .storage()
        .revoke_token(RevokeTokenRequest {
            token_hash: hash,
            reason,
        })
        .await?
    {
        Some(record) => record,
        None => {
            counter!("api_token_requests_total", "endpoint" => "revoke", "status" => "not_found")
                .increment(1);
            return Err(LedgerError::NotFound("token".into()).into());
        }
    };

    let response = TokenStatusResponse::from(record);
    counter!("api_token_requests_total", "endpoint" => "revoke", "status" => response.status.as_ref().to_owned())
        .increment(1);
    Ok(ok(response))
}
