use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    error::LedgerError,
    model::{ContributorId, HttpMethod},
};

/// Upper bound on the number of headers forwarded with one exchange.
pub const MAX_RELAY_HEADERS: usize = 64;

/// The HTTP exchange a partner asks to push through a contributor.
///
/// Its serialized JSON form is what gets billed as request bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub target_url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl RelayRequest {
    pub fn new(target_url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            target_url: target_url.into(),
            method,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        let url = self.target_url.trim();
        if url.is_empty() {
            return Err(LedgerError::validation("targetUrl is required"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(LedgerError::validation(
                "targetUrl must be an absolute http(s) URL",
            ));
        }
        if self.headers.len() > MAX_RELAY_HEADERS {
            return Err(LedgerError::validation(format!(
                "at most {MAX_RELAY_HEADERS} headers may be forwarded"
            )));
        }
        Ok(())
    }

    /// Billed request size in bytes.
    pub fn wire_size(&self) -> u64 {
        json_len(self)
    }
}

/// What came back from the target, as handed to the partner.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: u16,
    /// Parsed JSON body, or the raw text as a JSON string when it was not
    /// JSON.
    pub data: Value,
}

impl RelayResponse {
    pub fn new(status: u16, data: Value) -> Self {
        Self { status, data }
    }

    /// Builds the payload from a raw body, keeping text that is not JSON.
    pub fn from_body(status: u16, body: &str) -> Self {
        let data = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_owned()));
        Self { status, data }
    }

    /// Billed response size in bytes.
    pub fn wire_size(&self) -> u64 {
        json_len(&self.data)
    }
}

fn json_len<T: Serialize + ?Sized>(value: &T) -> u64 {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay timed out")]
    Timeout,
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("invalid relay request: {0}")]
    InvalidRequest(String),
}

/// Carries one exchange through a contributor's connection.
#[async_trait]
pub trait TrafficRelay: Send + Sync {
    async fn relay(
        &self,
        contributor: &ContributorId,
        request: &RelayRequest,
    ) -> Result<RelayResponse, RelayError>;
}
