//! Outbound collaborators for the ledger: the HTTP relay that carries partner
//! traffic through contributors, the payout rail client and the worker that
//! reconciles payouts whose rail outcome was never confirmed.

pub mod pipeline;
pub mod rail;
pub mod relay;
pub mod worker;

pub use pipeline::{reconcile_stale, ReconcileSummary};
pub use rail::HttpPayoutRail;
pub use relay::{HttpTrafficRelay, CONTRIBUTOR_HEADER};
pub use worker::{run_monitor, MonitorError};
