pub mod contributor;
pub mod observability;
pub mod partner;
pub mod payout;
pub mod token;

pub use contributor::{
    data_shared_handler, earnings_handler, start_sharing_handler, stop_sharing_handler,
};
pub use observability::{health_handler, metrics_handler};
pub use partner::{partner_request_handler, partner_stats_handler};
pub use payout::{payout_eligibility_handler, payout_history_handler, payout_request_handler};
pub use token::revoke_token_handler;

use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    http::{header::AUTHORIZATION, StatusCode},
    web, HttpRequest, HttpResponse, ResponseError,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use bandshare_domain::model::{ContributorId, PartnerRecord};
use bandshare_domain::storage::StorageError;
use bandshare_domain::LedgerError;

use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_SECRET_HEADER: &str = "x-api-secret";

const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        Self::Ledger(value.into())
    }
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Ledger(err) => err.kind(),
            ApiError::Malformed(_) => "malformed",
        }
    }

    /// Message shown to the caller. Storage internals stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Ledger(LedgerError::Auth(message))
            | ApiError::Ledger(LedgerError::Validation(message))
            | ApiError::Ledger(LedgerError::ResourceUnavailable(message))
            | ApiError::Ledger(LedgerError::InsufficientFunds(message))
            | ApiError::Ledger(LedgerError::ExternalService(message)) => message.clone(),
            ApiError::Ledger(err @ LedgerError::NotFound(_)) => err.to_string(),
            ApiError::Ledger(LedgerError::Storage(_)) => INTERNAL_ERROR.to_string(),
            ApiError::Malformed(_) => self.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(LedgerError::Auth(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Ledger(LedgerError::Validation(_)) | ApiError::Malformed(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Ledger(LedgerError::ResourceUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ledger(LedgerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Ledger(LedgerError::InsufficientFunds(_))
            | ApiError::Ledger(LedgerError::ExternalService(_))
            | ApiError::Ledger(LedgerError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        counter!("api_errors_total", "kind" => self.kind()).increment(1);
        if let ApiError::Ledger(LedgerError::Storage(err)) = self {
            error!(error = %err, "storage failure while serving request");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            success: false,
            error: self.public_message(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

/// Successful responses share the `{success: true, data}` envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

pub(crate) fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        success: true,
        data,
    })
}

/// JSON extractor settings that report body errors in the API's error shape.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req| {
        ApiError::Malformed(err.to_string()).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err: QueryPayloadError, _req| {
        ApiError::Malformed(err.to_string()).into()
    })
}

/// Decodes a JSON body taken as raw bytes, so credentials are checked before
/// the payload is looked at.
pub(crate) fn json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::Malformed(format!("Json deserialize error: {err}")))
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

pub(crate) async fn authenticate_partner(
    state: &AppState,
    req: &HttpRequest,
) -> Result<PartnerRecord, ApiError> {
    Ok(state
        .partners()
        .authenticate(header(req, API_KEY_HEADER), header(req, API_SECRET_HEADER))
        .await?)
}

pub(crate) async fn authenticate_contributor(
    state: &AppState,
    req: &HttpRequest,
) -> Result<ContributorId, ApiError> {
    Ok(state
        .contributors()
        .authenticate(header(req, AUTHORIZATION.as_str()))
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        let cases = [
            (LedgerError::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (LedgerError::validation("x"), StatusCode::BAD_REQUEST),
            (
                LedgerError::ResourceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                LedgerError::InsufficientFunds("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                LedgerError::ExternalService("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (LedgerError::NotFound("partner".into()), StatusCode::NOT_FOUND),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn storage_details_are_not_exposed() {
        let err = ApiError::from(StorageError::Database("disk I/O error at page 7".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), INTERNAL_ERROR);
    }

    #[test]
    fn auth_messages_are_passed_through_verbatim() {
        let err = ApiError::from(LedgerError::Auth("Invalid API credentials".into()));
        assert_eq!(err.public_message(), "Invalid API credentials");
    }
}
