use bandshare_domain::model::{ContributorId, RelayCandidate, RelaySessionRecord};
use bandshare_domain::storage::{SessionStore, StorageResult};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};

use crate::entity::relay_sessions;
use crate::{db_err, SeaOrmStorage};

#[async_trait::async_trait]
impl SessionStore for SeaOrmStorage {
    async fn activate_session(
        &self,
        contributor: &ContributorId,
        bandwidth_limit_gb: f64,
        started_at: DateTime<Utc>,
    ) -> StorageResult<RelaySessionRecord> {
        let txn = self.connection().begin().await.map_err(db_err)?;
        close_active(&txn, contributor, started_at).await?;

        let model = relay_sessions::ActiveModel {
            contributor_id: Set(contributor.as_str().to_owned()),
            bandwidth_limit_gb: Set(bandwidth_limit_gb),
            bytes_relayed_mb: Set(0.0),
            is_active: Set(true),
            started_at: Set(started_at),
            stopped_at: Set(None),
            updated_at: Set(started_at),
            ..Default::default()
        };
        let created = model.insert(&txn).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(session_to_record(created))
    }

    async fn deactivate_sessions(
        &self,
        contributor: &ContributorId,
        stopped_at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        close_active(self.connection(), contributor, stopped_at).await
    }

    async fn find_active_session(
        &self,
        contributor: &ContributorId,
    ) -> StorageResult<Option<RelaySessionRecord>> {
        find_active(self.connection(), contributor)
            .await
            .map(|maybe| maybe.map(session_to_record))
    }

    async fn list_relay_candidates(
        &self,
        min_headroom_mb: f64,
        limit: u64,
    ) -> StorageResult<Vec<RelayCandidate>> {
        let headroom = Expr::col(relay_sessions::Column::BandwidthLimitGb)
            .mul(1024.0)
            .sub(Expr::col(relay_sessions::Column::BytesRelayedMb));
        let rows = relay_sessions::Entity::find()
            .filter(relay_sessions::Column::IsActive.eq(true))
            .filter(Expr::expr(headroom).gte(min_headroom_mb))
            .order_by_desc(relay_sessions::Column::UpdatedAt)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(session_to_record)
            .map(|session| RelayCandidate {
                headroom_mb: session.headroom_mb(),
                contributor_id: session.contributor_id,
                session_id: session.id,
            })
            .collect())
    }

    async fn data_shared_since(
        &self,
        contributor: &ContributorId,
        since: DateTime<Utc>,
    ) -> StorageResult<f64> {
        let rows = relay_sessions::Entity::find()
            .filter(relay_sessions::Column::ContributorId.eq(contributor.as_str()))
            .filter(relay_sessions::Column::StartedAt.gte(since))
            .all(self.connection())
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(|row| row.bytes_relayed_mb).sum())
    }
}

pub(crate) async fn find_active<C>(
    conn: &C,
    contributor: &ContributorId,
) -> StorageResult<Option<relay_sessions::Model>>
where
    C: ConnectionTrait,
{
    relay_sessions::Entity::find()
        .filter(relay_sessions::Column::ContributorId.eq(contributor.as_str()))
        .filter(relay_sessions::Column::IsActive.eq(true))
        .order_by_desc(relay_sessions::Column::StartedAt)
        .one(conn)
        .await
        .map_err(db_err)
}

async fn close_active<C>(
    conn: &C,
    contributor: &ContributorId,
    at: DateTime<Utc>,
) -> StorageResult<u64>
where
    C: ConnectionTrait,
{
    let result = relay_sessions::Entity::update_many()
        .col_expr(relay_sessions::Column::IsActive, Expr::value(false))
        .col_expr(relay_sessions::Column::StoppedAt, Expr::value(at))
        .col_expr(relay_sessions::Column::UpdatedAt, Expr::value(at))
        .filter(relay_sessions::Column::ContributorId.eq(contributor.as_str()))
        .filter(relay_sessions::Column::IsActive.eq(true))
        .exec(conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected)
}

pub(crate) fn session_to_record(model: relay_sessions::Model) -> RelaySessionRecord {
    RelaySessionRecord {
        id: i64::from(model.id),
        contributor_id: ContributorId::new(model.contributor_id),
        bandwidth_limit_gb: model.bandwidth_limit_gb,
        bytes_relayed_mb: model.bytes_relayed_mb,
        is_active: model.is_active,
        started_at: model.started_at,
        stopped_at: model.stopped_at,
        updated_at: model.updated_at,
    }
}
