use bandshare_domain::model::ContributorId;
use bandshare_domain::storage::{
    SettlementDraft, SettlementReceipt, SettlementRejection, SettlementStore, StorageError,
    StorageResult,
};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::earnings_store::find_earnings_row;
use crate::entity::{contributor_earnings, partners, relay_sessions, usage_records};
use crate::partner_store::status_from_db;
use crate::session_store::find_active;
use crate::usage_store::encode_headers;
use crate::{db_err, SeaOrmStorage};

#[async_trait::async_trait]
impl SettlementStore for SeaOrmStorage {
    async fn apply_settlement(
        &self,
        draft: SettlementDraft,
    ) -> StorageResult<Result<SettlementReceipt, SettlementRejection>> {
        let txn = self.connection().begin().await.map_err(db_err)?;
        match settle(&txn, &draft).await? {
            Ok(receipt) => {
                txn.commit().await.map_err(db_err)?;
                Ok(Ok(receipt))
            }
            Err(rejection) => {
                txn.rollback().await.map_err(db_err)?;
                Ok(Err(rejection))
            }
        }
    }
}

async fn settle(
    txn: &DatabaseTransaction,
    draft: &SettlementDraft,
) -> StorageResult<Result<SettlementReceipt, SettlementRejection>> {
    let cost = draft.charge.cost;
    let now = draft.recorded_at;

    let Some(partner) = partners::Entity::find_by_id(draft.partner_id.as_str().to_owned())
        .one(txn)
        .await
        .map_err(db_err)?
    else {
        return Ok(Err(SettlementRejection::PartnerMissing));
    };
    if partner.status != partners::PartnerStatusDb::Active {
        return Ok(Err(SettlementRejection::PartnerInactive(status_from_db(
            partner.status,
        ))));
    }
    let Some(session) = find_active(txn, &draft.contributor_id).await? else {
        return Ok(Err(SettlementRejection::NoActiveSession));
    };
    if partner.balance <= 0.0 {
        return Ok(Err(SettlementRejection::BalanceExhausted {
            balance: partner.balance,
        }));
    }
    if cost > partner.balance {
        return Ok(Err(SettlementRejection::InsufficientBalance {
            required: cost,
            available: partner.balance,
        }));
    }

    let debited = partners::Entity::update_many()
        .col_expr(
            partners::Column::Balance,
            Expr::col(partners::Column::Balance).sub(cost),
        )
        .col_expr(
            partners::Column::TotalUsageGb,
            Expr::col(partners::Column::TotalUsageGb).add(draft.charge.billed_volume_gb),
        )
        .col_expr(
            partners::Column::TotalSpent,
            Expr::col(partners::Column::TotalSpent).add(cost),
        )
        .col_expr(partners::Column::UpdatedAt, Expr::value(now))
        .filter(partners::Column::Id.eq(partner.id.as_str()))
        .filter(partners::Column::Status.eq(partners::PartnerStatusDb::Active))
        .filter(partners::Column::Balance.gte(cost))
        .exec(txn)
        .await
        .map_err(db_err)?;
    if debited.rows_affected == 0 {
        return Ok(Err(SettlementRejection::InsufficientBalance {
            required: cost,
            available: partner.balance,
        }));
    }

    let contributor_total =
        credit_contributor(txn, &draft.contributor_id, draft.charge.contributor_earnings, now)
            .await?;

    relay_sessions::Entity::update_many()
        .col_expr(
            relay_sessions::Column::BytesRelayedMb,
            Expr::col(relay_sessions::Column::BytesRelayedMb).add(draft.charge.billed_volume_mb),
        )
        .col_expr(relay_sessions::Column::UpdatedAt, Expr::value(now))
        .filter(relay_sessions::Column::Id.eq(session.id))
        .exec(txn)
        .await
        .map_err(db_err)?;

    let usage = usage_records::ActiveModel {
        partner_id: Set(draft.partner_id.as_str().to_owned()),
        contributor_id: Set(draft.contributor_id.as_str().to_owned()),
        target_url: Set(draft.target_url.clone()),
        method: Set(draft.method.to_string()),
        headers: Set(encode_headers(&draft.headers)?),
        body: Set(draft.body.clone()),
        response_status: Set(i32::from(draft.response_status)),
        response_size: Set(i64::try_from(draft.response_size).unwrap_or(i64::MAX)),
        billed_volume_mb: Set(draft.charge.billed_volume_mb),
        cost: Set(cost),
        contributor_earnings: Set(draft.charge.contributor_earnings),
        recorded_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(db_err)?;

    let balance = partners::Entity::find_by_id(partner.id.clone())
        .one(txn)
        .await
        .map_err(db_err)?
        .map(|row| row.balance)
        .ok_or_else(|| StorageError::Corrupt(format!("partner {} vanished", partner.id)))?;

    Ok(Ok(SettlementReceipt {
        usage_record_id: i64::from(usage.id),
        session_id: i64::from(session.id),
        partner_balance: balance,
        contributor_total_earned: contributor_total,
    }))
}

/// Adds `amount` to the contributor's running totals, restarting the daily
/// counter when the stored day is not the day of `now`. Returns the new total.
async fn credit_contributor(
    txn: &DatabaseTransaction,
    contributor: &ContributorId,
    amount: f64,
    now: chrono::DateTime<chrono::Utc>,
) -> StorageResult<f64> {
    let today = now.date_naive();
    match find_earnings_row(txn, contributor).await? {
        Some(row) => {
            let today_earned = if row.today_date == today {
                row.today_earned + amount
            } else {
                amount
            };
            let total_earned = row.total_earned + amount;
            contributor_earnings::Entity::update_many()
                .col_expr(
                    contributor_earnings::Column::TodayEarned,
                    Expr::value(today_earned),
                )
                .col_expr(contributor_earnings::Column::TodayDate, Expr::value(today))
                .col_expr(
                    contributor_earnings::Column::TotalEarned,
                    Expr::col(contributor_earnings::Column::TotalEarned).add(amount),
                )
                .col_expr(contributor_earnings::Column::UpdatedAt, Expr::value(now))
                .filter(contributor_earnings::Column::ContributorId.eq(contributor.as_str()))
                .exec(txn)
                .await
                .map_err(db_err)?;
            Ok(total_earned)
        }
        None => {
            contributor_earnings::ActiveModel {
                contributor_id: Set(contributor.as_str().to_owned()),
                today_earned: Set(amount),
                today_date: Set(today),
                total_earned: Set(amount),
                updated_at: Set(now),
            }
            .insert(txn)
            .await
            .map_err(db_err)?;
            Ok(amount)
        }
    }
}
