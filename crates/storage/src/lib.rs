//! SeaORM-backed storage adapters that satisfy the domain ledger traits while
//! keeping the database backend swappable (SQLite by default, PostgreSQL via
//! feature flag).
//!
//! Every multi-row ledger mutation (settlement, payout reservation and
//! completion, session activation) runs inside a single database transaction.

mod builder;
mod earnings_store;
mod entity;
mod migration;
mod partner_store;
mod payout_store;
mod session_store;
mod settlement_store;
mod token_store;
mod usage_store;


use std::sync::Arc;

use bandshare_domain::storage::{StorageError, StorageResult};
use migration::run_migrations;
use sea_orm::DatabaseConnection;

pub use builder::StorageBuilder;

/// Shared storage handle used by the HTTP API, the monitor and the
/// provisioning CLI.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::builder().database_url(database_url).build().await
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_connection(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

pub(crate) async fn prepare_connection(db: &DatabaseConnection) -> StorageResult<()> {
    run_migrations(db).await
}

pub(crate) fn db_err(err: sea_orm::DbErr) -> StorageError {
    StorageError::from_source(err)
}
