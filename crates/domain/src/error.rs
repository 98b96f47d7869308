use thiserror::Error;

use crate::storage::StorageError;

/// Failure taxonomy shared by the metering, settlement and payout engines.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ResourceUnavailable(String),
    #[error("{0}")]
    InsufficientFunds(String),
    #[error("external service failure: {0}")]
    ExternalService(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short label used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Auth(_) => "auth",
            LedgerError::Validation(_) => "validation",
            LedgerError::ResourceUnavailable(_) => "unavailable",
            LedgerError::InsufficientFunds(_) => "insufficient_funds",
            LedgerError::ExternalService(_) => "external",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Storage(_) => "storage",
        }
    }
}
