//! Domain-level building blocks shared across the API and monitor crates.
//!
//! Everything that decides how money moves lives here: the ledger model, the
//! storage contracts the SeaORM adapters satisfy, the pure metering math and
//! the settlement/payout engines that sequence them.

pub mod config;
pub mod error;
pub mod model;
pub mod services;
pub mod storage;

pub use error::LedgerError;
pub use storage::*;
