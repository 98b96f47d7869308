use bandshare_domain::model::{ContributorId, EarningsRecord};
use bandshare_domain::storage::{EarningsStore, StorageResult};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, EntityTrait, Set};

use crate::entity::contributor_earnings;
use crate::{db_err, SeaOrmStorage};

#[async_trait::async_trait]
impl EarningsStore for SeaOrmStorage {
    async fn ensure_earnings(
        &self,
        contributor: &ContributorId,
        at: DateTime<Utc>,
    ) -> StorageResult<EarningsRecord> {
        let row = contributor_earnings::ActiveModel {
            contributor_id: Set(contributor.as_str().to_owned()),
            today_earned: Set(0.0),
            today_date: Set(at.date_naive()),
            total_earned: Set(0.0),
            updated_at: Set(at),
        };
        contributor_earnings::Entity::insert(row)
            .on_conflict(
                OnConflict::column(contributor_earnings::Column::ContributorId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(db_err)?;

        let model = find_earnings_row(self.connection(), contributor)
            .await?
            .ok_or_else(|| {
                bandshare_domain::storage::StorageError::Corrupt(format!(
                    "earnings row for {contributor} vanished after upsert"
                ))
            })?;
        Ok(earnings_to_record(model))
    }

    async fn find_earnings(
        &self,
        contributor: &ContributorId,
    ) -> StorageResult<Option<EarningsRecord>> {
        find_earnings_row(self.connection(), contributor)
            .await
            .map(|maybe| maybe.map(earnings_to_record))
    }
}

pub(crate) async fn find_earnings_row<C>(
    conn: &C,
    contributor: &ContributorId,
) -> StorageResult<Option<contributor_earnings::Model>>
where
    C: ConnectionTrait,
{
    contributor_earnings::Entity::find_by_id(contributor.as_str().to_owned())
        .one(conn)
        .await
        .map_err(db_err)
}

pub(crate) fn earnings_to_record(model: contributor_earnings::Model) -> EarningsRecord {
    EarningsRecord {
        contributor_id: ContributorId::new(model.contributor_id),
        today_earned: model.today_earned,
        today_date: model.today_date,
        total_earned: model.total_earned,
        updated_at: model.updated_at,
    }
}
