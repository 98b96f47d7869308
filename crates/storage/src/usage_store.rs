use std::collections::BTreeMap;

use bandshare_domain::model::{
    ContributorId, DateWindow, HttpMethod, PartnerId, UsageRecord, UsageTotals,
};
use bandshare_domain::storage::{StorageError, StorageResult, UsageStore};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

use crate::entity::usage_records;
use crate::{db_err, SeaOrmStorage};

#[async_trait::async_trait]
impl UsageStore for SeaOrmStorage {
    async fn usage_totals(
        &self,
        partner: &PartnerId,
        window: &DateWindow,
    ) -> StorageResult<UsageTotals> {
        let rows = usage_records::Entity::find()
            .filter(usage_records::Column::PartnerId.eq(partner.as_str()))
            .filter(usage_records::Column::RecordedAt.gte(window.start))
            .filter(usage_records::Column::RecordedAt.lte(window.end))
            .all(self.connection())
            .await
            .map_err(db_err)?;

        Ok(rows.iter().fold(UsageTotals::default(), |mut totals, row| {
            totals.total_requests += 1;
            totals.total_data_mb += row.billed_volume_mb;
            totals.total_cost += row.cost;
            totals.total_user_earnings += row.contributor_earnings;
            totals
        }))
    }

    async fn list_usage(
        &self,
        partner: &PartnerId,
        window: &DateWindow,
        limit: u64,
    ) -> StorageResult<Vec<UsageRecord>> {
        let rows = usage_records::Entity::find()
            .filter(usage_records::Column::PartnerId.eq(partner.as_str()))
            .filter(usage_records::Column::RecordedAt.gte(window.start))
            .filter(usage_records::Column::RecordedAt.lte(window.end))
            .order_by_desc(usage_records::Column::RecordedAt)
            .order_by_desc(usage_records::Column::Id)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(db_err)?;
        rows.into_iter().map(usage_to_record).collect()
    }
}

pub(crate) fn encode_headers(headers: &BTreeMap<String, String>) -> StorageResult<String> {
    serde_json::to_string(headers).map_err(|err| StorageError::Corrupt(err.to_string()))
}

fn usage_to_record(model: usage_records::Model) -> StorageResult<UsageRecord> {
    let method: HttpMethod = model
        .method
        .parse()
        .map_err(|_| StorageError::Corrupt(format!("unknown method {}", model.method)))?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&model.headers)
        .map_err(|err| StorageError::Corrupt(format!("usage {} headers: {err}", model.id)))?;

    Ok(UsageRecord {
        id: i64::from(model.id),
        partner_id: PartnerId::new(model.partner_id),
        contributor_id: ContributorId::new(model.contributor_id),
        target_url: model.target_url,
        method,
        headers,
        body: model.body,
        response_status: u16::try_from(model.response_status).unwrap_or_default(),
        response_size: u64::try_from(model.response_size).unwrap_or_default(),
        billed_volume_mb: model.billed_volume_mb,
        cost: model.cost,
        contributor_earnings: model.contributor_earnings,
        recorded_at: model.recorded_at,
    })
}
