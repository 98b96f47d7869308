use sea_orm::sea_query::{
    ColumnDef, Expr, Index, IndexCreateStatement, Table, TableCreateStatement,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{
    contributor_earnings, contributor_tokens, partners, payouts, relay_sessions, usage_records,
};
use bandshare_domain::storage::{StorageError, StorageResult};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let partners_table = Table::create()
        .table(partners::Entity)
        .col(
            ColumnDef::new(partners::Column::Id)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(partners::Column::Name).string().not_null())
        .col(ColumnDef::new(partners::Column::Email).string().not_null())
        .col(
            ColumnDef::new(partners::Column::ApiKey)
                .string_len(128)
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(partners::Column::ApiSecretHash)
                .string_len(64)
                .not_null(),
        )
        .col(
            ColumnDef::new(partners::Column::Status)
                .tiny_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(partners::Column::PricingTier)
                .tiny_integer()
                .not_null()
                .default(1),
        )
        .col(
            ColumnDef::new(partners::Column::PricePerGb)
                .double()
                .not_null(),
        )
        .col(
            ColumnDef::new(partners::Column::Balance)
                .double()
                .not_null()
                .default(0.0),
        )
        .col(
            ColumnDef::new(partners::Column::TotalUsageGb)
                .double()
                .not_null()
                .default(0.0),
        )
        .col(
            ColumnDef::new(partners::Column::TotalSpent)
                .double()
                .not_null()
                .default(0.0),
        )
        .col(
            ColumnDef::new(partners::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(partners::Column::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, partners_table).await?;

    let earnings_table = Table::create()
        .table(contributor_earnings::Entity)
        .col(
            ColumnDef::new(contributor_earnings::Column::ContributorId)
                .string_len(128)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(contributor_earnings::Column::TodayEarned)
                .double()
                .not_null()
                .default(0.0),
        )
        .col(
            ColumnDef::new(contributor_earnings::Column::TodayDate)
                .date()
                .not_null(),
        )
        .col(
            ColumnDef::new(contributor_earnings::Column::TotalEarned)
                .double()
                .not_null()
                .default(0.0),
        )
        .col(
            ColumnDef::new(contributor_earnings::Column::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, earnings_table).await?;

    let sessions_table = Table::create()
        .table(relay_sessions::Entity)
        .col(
            ColumnDef::new(relay_sessions::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(relay_sessions::Column::ContributorId)
                .string_len(128)
                .not_null(),
        )
        .col(
            ColumnDef::new(relay_sessions::Column::BandwidthLimitGb)
                .double()
                .not_null(),
        )
        .col(
            ColumnDef::new(relay_sessions::Column::BytesRelayedMb)
                .double()
                .not_null()
                .default(0.0),
        )
        .col(
            ColumnDef::new(relay_sessions::Column::IsActive)
                .boolean()
                .not_null(),
        )
        .col(
            ColumnDef::new(relay_sessions::Column::StartedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(relay_sessions::Column::StoppedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .col(
            ColumnDef::new(relay_sessions::Column::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, sessions_table).await?;

    let usage_table = Table::create()
        .table(usage_records::Entity)
        .col(
            ColumnDef::new(usage_records::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(usage_records::Column::PartnerId)
                .string_len(64)
                .not_null(),
        )
        .col(
            ColumnDef::new(usage_records::Column::ContributorId)
                .string_len(128)
                .not_null(),
        )
        .col(
            ColumnDef::new(usage_records::Column::TargetUrl)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(usage_records::Column::Method)
                .string_len(8)
                .not_null(),
        )
        .col(
            ColumnDef::new(usage_records::Column::Headers)
                .text()
                .not_null(),
        )
        .col(ColumnDef::new(usage_records::Column::Body).text().null())
        .col(
            ColumnDef::new(usage_records::Column::ResponseStatus)
                .integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(usage_records::Column::ResponseSize)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(usage_records::Column::BilledVolumeMb)
                .double()
                .not_null(),
        )
        .col(ColumnDef::new(usage_records::Column::Cost).double().not_null())
        .col(
            ColumnDef::new(usage_records::Column::ContributorEarnings)
                .double()
                .not_null(),
        )
        .col(
            ColumnDef::new(usage_records::Column::RecordedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, usage_table).await?;

    let payouts_table = Table::create()
        .table(payouts::Entity)
        .col(
            ColumnDef::new(payouts::Column::Id)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(payouts::Column::ContributorId)
                .string_len(128)
                .not_null(),
        )
        .col(ColumnDef::new(payouts::Column::Amount).double().not_null())
        .col(ColumnDef::new(payouts::Column::Credits).double().not_null())
        .col(
            ColumnDef::new(payouts::Column::Status)
                .tiny_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(payouts::Column::PaymentMethod)
                .tiny_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(payouts::Column::PaymentDetails)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(payouts::Column::TransactionId)
                .string()
                .null(),
        )
        .col(ColumnDef::new(payouts::Column::ErrorMessage).text().null())
        .col(
            ColumnDef::new(payouts::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(payouts::Column::ProcessedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned();
    create_table(db, backend, payouts_table).await?;

    let tokens_table = Table::create()
        .table(contributor_tokens::Entity)
        .col(
            ColumnDef::new(contributor_tokens::Column::TokenHash)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(contributor_tokens::Column::ContributorId)
                .string_len(128)
                .not_null(),
        )
        .col(
            ColumnDef::new(contributor_tokens::Column::IssuedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(contributor_tokens::Column::RevokedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .col(
            ColumnDef::new(contributor_tokens::Column::RevokeReason)
                .string()
                .null(),
        )
        .to_owned();
    create_table(db, backend, tokens_table).await?;

    create_index(
        db,
        backend,
        Index::create()
            .name("idx_relay_sessions_contributor_active")
            .table(relay_sessions::Entity)
            .col(relay_sessions::Column::ContributorId)
            .col(relay_sessions::Column::IsActive)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_usage_records_partner_recorded")
            .table(usage_records::Entity)
            .col(usage_records::Column::PartnerId)
            .col(usage_records::Column::RecordedAt)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_payouts_contributor_status")
            .table(payouts::Entity)
            .col(payouts::Column::ContributorId)
            .col(payouts::Column::Status)
            .to_owned(),
    )
    .await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: IndexCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
