//! Ledger services: pure metering math, credential checks, contributor
//! selection and the settlement/payout engines built on the storage traits.

pub mod auth;
pub mod locks;
pub mod metering;
pub mod payout;
pub mod rail;
pub mod relay;
pub mod selector;
pub mod settlement;
pub mod sharing;
pub mod telemetry;

pub use auth::*;
pub use locks::*;
pub use metering::*;
pub use payout::*;
pub use rail::*;
pub use relay::*;
pub use selector::*;
pub use settlement::*;
pub use sharing::*;
pub use telemetry::*;
