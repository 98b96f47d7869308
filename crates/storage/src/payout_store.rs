use bandshare_domain::model::{
    ContributorId, NewPayout, PaymentDetails, PaymentMethod, PayoutId, PayoutRecord, PayoutStatus,
};
use bandshare_domain::storage::{PayoutStore, ReservationOutcome, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};

use crate::earnings_store::find_earnings_row;
use crate::entity::contributor_earnings;
use crate::entity::payouts::{self, PaymentMethodDb, PayoutStatusDb};
use crate::{db_err, SeaOrmStorage};

const IN_FLIGHT: [PayoutStatusDb; 2] = [PayoutStatusDb::Pending, PayoutStatusDb::Processing];

#[async_trait::async_trait]
impl PayoutStore for SeaOrmStorage {
    async fn reserved_amount(&self, contributor: &ContributorId) -> StorageResult<f64> {
        reserved(self.connection(), contributor).await
    }

    async fn reserve_payout(&self, payout: NewPayout) -> StorageResult<ReservationOutcome> {
        let txn = self.connection().begin().await.map_err(db_err)?;

        let earned = find_earnings_row(&txn, &payout.contributor_id)
            .await?
            .map(|row| row.total_earned)
            .unwrap_or(0.0);
        let held = reserved(&txn, &payout.contributor_id).await?;
        let available = (earned - held).max(0.0);
        if payout.amount > available {
            txn.rollback().await.map_err(db_err)?;
            return Ok(ReservationOutcome::Insufficient { available });
        }

        let details = serde_json::to_string(&payout.payment_details)
            .map_err(|err| StorageError::Corrupt(err.to_string()))?;
        let model = payouts::ActiveModel {
            id: Set(payout.id.into_inner()),
            contributor_id: Set(payout.contributor_id.into_inner()),
            amount: Set(payout.amount),
            credits: Set(payout.credits),
            status: Set(status_to_db(payout.status)),
            payment_method: Set(method_to_db(payout.payment_method)),
            payment_details: Set(details),
            transaction_id: Set(None),
            error_message: Set(None),
            created_at: Set(payout.created_at),
            processed_at: Set(None),
        };
        let created = model.insert(&txn).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        payout_to_record(created).map(ReservationOutcome::Reserved)
    }

    async fn complete_payout(
        &self,
        id: &PayoutId,
        transaction_id: &str,
        processed_at: DateTime<Utc>,
    ) -> StorageResult<Option<PayoutRecord>> {
        let txn = self.connection().begin().await.map_err(db_err)?;
        let advanced = payouts::Entity::update_many()
            .col_expr(
                payouts::Column::Status,
                Expr::value(PayoutStatusDb::Completed),
            )
            .col_expr(
                payouts::Column::TransactionId,
                Expr::value(transaction_id.to_owned()),
            )
            .col_expr(payouts::Column::ProcessedAt, Expr::value(processed_at))
            .filter(payouts::Column::Id.eq(id.as_str()))
            .filter(payouts::Column::Status.eq(PayoutStatusDb::Processing))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if advanced.rows_affected == 0 {
            txn.rollback().await.map_err(db_err)?;
            return Ok(None);
        }

        let payout = find_row(&txn, id).await?;
        debit_earnings(&txn, &payout, processed_at).await?;
        txn.commit().await.map_err(db_err)?;
        payout_to_record(payout).map(Some)
    }

    async fn fail_payout(
        &self,
        id: &PayoutId,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> StorageResult<Option<PayoutRecord>> {
        let failed = payouts::Entity::update_many()
            .col_expr(payouts::Column::Status, Expr::value(PayoutStatusDb::Failed))
            .col_expr(
                payouts::Column::ErrorMessage,
                Expr::value(error_message.to_owned()),
            )
            .col_expr(payouts::Column::ProcessedAt, Expr::value(processed_at))
            .filter(payouts::Column::Id.eq(id.as_str()))
            .filter(payouts::Column::Status.eq(PayoutStatusDb::Processing))
            .exec(self.connection())
            .await
            .map_err(db_err)?;
        if failed.rows_affected == 0 {
            return Ok(None);
        }
        let payout = find_row(self.connection(), id).await?;
        payout_to_record(payout).map(Some)
    }

    async fn find_payout(&self, id: &PayoutId) -> StorageResult<Option<PayoutRecord>> {
        let maybe = payouts::Entity::find_by_id(id.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(db_err)?;
        maybe.map(payout_to_record).transpose()
    }

    async fn list_payouts(
        &self,
        contributor: &ContributorId,
        limit: u64,
    ) -> StorageResult<Vec<PayoutRecord>> {
        let rows = payouts::Entity::find()
            .filter(payouts::Column::ContributorId.eq(contributor.as_str()))
            .order_by_desc(payouts::Column::CreatedAt)
            .order_by_desc(payouts::Column::Id)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(db_err)?;
        rows.into_iter().map(payout_to_record).collect()
    }

    async fn list_stale_processing(
        &self,
        created_before: DateTime<Utc>,
        limit: u64,
    ) -> StorageResult<Vec<PayoutRecord>> {
        let rows = payouts::Entity::find()
            .filter(payouts::Column::Status.eq(PayoutStatusDb::Processing))
            .filter(payouts::Column::CreatedAt.lt(created_before))
            .order_by_asc(payouts::Column::CreatedAt)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(db_err)?;
        rows.into_iter().map(payout_to_record).collect()
    }
}

async fn reserved<C>(conn: &C, contributor: &ContributorId) -> StorageResult<f64>
where
    C: ConnectionTrait,
{
    let rows = payouts::Entity::find()
        .filter(payouts::Column::ContributorId.eq(contributor.as_str()))
        .filter(payouts::Column::Status.is_in(IN_FLIGHT))
        .all(conn)
        .await
        .map_err(db_err)?;
    Ok(rows.iter().map(|row| row.amount).sum())
}

async fn find_row<C>(conn: &C, id: &PayoutId) -> StorageResult<payouts::Model>
where
    C: ConnectionTrait,
{
    payouts::Entity::find_by_id(id.as_str().to_owned())
        .one(conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StorageError::Corrupt(format!("payout {id} vanished")))
}

/// Removes a completed payout from the contributor's total, never going
/// below zero.
async fn debit_earnings(
    txn: &DatabaseTransaction,
    payout: &payouts::Model,
    at: DateTime<Utc>,
) -> StorageResult<()> {
    let contributor = ContributorId::new(payout.contributor_id.clone());
    if find_earnings_row(txn, &contributor).await?.is_none() {
        return Ok(());
    }

    let covered = contributor_earnings::Entity::update_many()
        .col_expr(
            contributor_earnings::Column::TotalEarned,
            Expr::col(contributor_earnings::Column::TotalEarned).sub(payout.amount),
        )
        .col_expr(contributor_earnings::Column::UpdatedAt, Expr::value(at))
        .filter(contributor_earnings::Column::ContributorId.eq(contributor.as_str()))
        .filter(contributor_earnings::Column::TotalEarned.gte(payout.amount))
        .exec(txn)
        .await
        .map_err(db_err)?;
    if covered.rows_affected == 0 {
        contributor_earnings::Entity::update_many()
            .col_expr(contributor_earnings::Column::TotalEarned, Expr::value(0.0))
            .col_expr(contributor_earnings::Column::UpdatedAt, Expr::value(at))
            .filter(contributor_earnings::Column::ContributorId.eq(contributor.as_str()))
            .exec(txn)
            .await
            .map_err(db_err)?;
    }
    Ok(())
}

fn payout_to_record(model: payouts::Model) -> StorageResult<PayoutRecord> {
    let payment_details: PaymentDetails = serde_json::from_str(&model.payment_details)
        .map_err(|err| StorageError::Corrupt(format!("payout {} details: {err}", model.id)))?;

    Ok(PayoutRecord {
        id: PayoutId::new(model.id),
        contributor_id: ContributorId::new(model.contributor_id),
        amount: model.amount,
        credits: model.credits,
        status: match model.status {
            PayoutStatusDb::Pending => PayoutStatus::Pending,
            PayoutStatusDb::Processing => PayoutStatus::Processing,
            PayoutStatusDb::Completed => PayoutStatus::Completed,
            PayoutStatusDb::Failed => PayoutStatus::Failed,
        },
        payment_method: match model.payment_method {
            PaymentMethodDb::Paypal => PaymentMethod::Paypal,
            PaymentMethodDb::Crypto => PaymentMethod::Crypto,
            PaymentMethodDb::Bank => PaymentMethod::Bank,
        },
        payment_details,
        transaction_id: model.transaction_id,
        error_message: model.error_message,
        created_at: model.created_at,
        processed_at: model.processed_at,
    })
}

fn status_to_db(status: PayoutStatus) -> PayoutStatusDb {
    match status {
        PayoutStatus::Pending => PayoutStatusDb::Pending,
        PayoutStatus::Processing => PayoutStatusDb::Processing,
        PayoutStatus::Completed => PayoutStatusDb::Completed,
        PayoutStatus::Failed => PayoutStatusDb::Failed,
    }
}

fn method_to_db(method: PaymentMethod) -> PaymentMethodDb {
    match method {
        PaymentMethod::Paypal => PaymentMethodDb::Paypal,
        PaymentMethod::Crypto => PaymentMethodDb::Crypto,
        PaymentMethod::Bank => PaymentMethodDb::Bank,
    }
}
