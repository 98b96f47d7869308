use metrics::counter;
use tracing::{debug, warn};

use crate::{
    error::LedgerError,
    model::{constant_time_eq, hash_api_secret, ContributorId, PartnerRecord, TokenHash},
    services::telemetry::{AuthFailureTracker, FailureVerdict},
    storage::{PartnerStore, TokenStore},
};

pub const MISSING_CREDENTIALS: &str = "API key and secret required";
pub const INVALID_CREDENTIALS: &str = "Invalid API credentials";
pub const MISSING_TOKEN: &str = "Authorization token required";
pub const INVALID_TOKEN: &str = "Invalid or revoked token";

/// Compared against when the API key is unknown, so both failure paths hash
/// and compare the same amount of data.
const DUMMY_SECRET_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Resolves a partner from an API key/secret pair.
#[derive(Clone)]
pub struct PartnerAuthenticator<S> {
    store: S,
    auth_failures: AuthFailureTracker,
}

impl<S> PartnerAuthenticator<S>
where
    S: PartnerStore,
{
    pub fn new(store: S, auth_failures: AuthFailureTracker) -> Self {
        Self { store, auth_failures }
    }

    pub async fn authenticate(
        &self,
        api_key: Option<&str>,
        api_secret: Option<&str>,
    ) -> Result<PartnerRecord, LedgerError> {
        let (api_key, api_secret) = match (non_empty(api_key), non_empty(api_secret)) {
            (Some(key), Some(secret)) => (key, secret),
            _ => {
                counter!("partner_auth_total", "result" => "missing").increment(1);
                return Err(LedgerError::Auth(MISSING_CREDENTIALS.into()));
            }
        };

        let partner = self.store.find_partner_by_api_key(api_key).await?;
        let presented = hash_api_secret(api_secret);
        let stored = partner
            .as_ref()
            .map(|partner| partner.api_secret_hash.as_str())
            .unwrap_or(DUMMY_SECRET_HASH);
        let secret_matches = constant_time_eq(presented.as_bytes(), stored.as_bytes());

        match partner {
            Some(partner) if secret_matches && partner.is_active() => {
                self.auth_failures.clear(api_key);
                counter!("partner_auth_total", "result" => "ok").increment(1);
                debug!(partner = %partner.id, "partner authenticated");
                Ok(partner)
            }
            Some(partner) if secret_matches => {
                counter!("partner_auth_total", "result" => "inactive").increment(1);
                warn!(partner = %partner.id, status = %partner.status, "inactive partner rejected");
                Err(LedgerError::Auth(INVALID_CREDENTIALS.into()))
            }
            _ => {
                counter!("partner_auth_total", "result" => "invalid").increment(1);
                if let FailureVerdict::Tripped { failures } = self.auth_failures.record_failure(api_key) {
                    warn!(failures, "repeated invalid partner credentials");
                }
                Err(LedgerError::Auth(INVALID_CREDENTIALS.into()))
            }
        }
    }
}

/// Resolves a contributor from an `Authorization: Bearer <token>` header.
#[derive(Clone)]
pub struct ContributorAuthenticator<S> {
    store: S,
    auth_failures: AuthFailureTracker,
}

impl<S> ContributorAuthenticator<S>
where
    S: TokenStore,
{
    pub fn new(store: S, auth_failures: AuthFailureTracker) -> Self {
        Self { store, auth_failures }
    }

    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<ContributorId, LedgerError> {
        let token = authorization
            .and_then(parse_bearer)
            .ok_or_else(|| LedgerError::Auth(MISSING_TOKEN.into()))?;
        let hash = TokenHash::of(token);

        match self.store.find_token(&hash).await? {
            Some(record) if !record.is_revoked() => Ok(record.contributor_id),
            _ => {
                counter!("contributor_auth_total", "result" => "invalid").increment(1);
                self.auth_failures.record_failure(hash.as_str());
                Err(LedgerError::Auth(INVALID_TOKEN.into()))
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Extracts the token from a `Bearer` authorization value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    non_empty(Some(token))
}
