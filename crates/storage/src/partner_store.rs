use bandshare_domain::model::{
    NewPartner, PartnerId, PartnerRecord, PartnerStatus, PricingTier,
};
use bandshare_domain::storage::{PartnerStore, StorageResult};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::entity::partners::{self, PartnerStatusDb, PricingTierDb};
use crate::{db_err, SeaOrmStorage};

#[async_trait::async_trait]
impl PartnerStore for SeaOrmStorage {
    async fn insert_partner(&self, partner: NewPartner) -> StorageResult<PartnerRecord> {
        let model = partners::ActiveModel {
            id: Set(partner.id.into_inner()),
            name: Set(partner.name),
            email: Set(partner.email),
            api_key: Set(partner.api_key),
            api_secret_hash: Set(partner.api_secret_hash),
            status: Set(PartnerStatusDb::Active),
            pricing_tier: Set(tier_to_db(partner.pricing_tier)),
            price_per_gb: Set(partner.price_per_gb),
            balance: Set(partner.balance.max(0.0)),
            total_usage_gb: Set(0.0),
            total_spent: Set(0.0),
            created_at: Set(partner.created_at),
            updated_at: Set(partner.created_at),
        };
        let created = model.insert(self.connection()).await.map_err(db_err)?;
        Ok(partner_to_record(created))
    }

    async fn find_partner(&self, id: &PartnerId) -> StorageResult<Option<PartnerRecord>> {
        let maybe = partners::Entity::find_by_id(id.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(db_err)?;
        Ok(maybe.map(partner_to_record))
    }

    async fn find_partner_by_api_key(
        &self,
        api_key: &str,
    ) -> StorageResult<Option<PartnerRecord>> {
        let maybe = partners::Entity::find()
            .filter(partners::Column::ApiKey.eq(api_key))
            .one(self.connection())
            .await
            .map_err(db_err)?;
        Ok(maybe.map(partner_to_record))
    }

    async fn update_partner_status(
        &self,
        id: &PartnerId,
        status: PartnerStatus,
    ) -> StorageResult<Option<PartnerRecord>> {
        let maybe = partners::Entity::find_by_id(id.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(db_err)?;
        let Some(model) = maybe else {
            return Ok(None);
        };

        let mut active: partners::ActiveModel = model.into();
        active.status = Set(status_to_db(status));
        active.updated_at = Set(Utc::now());
        let updated = active.update(self.connection()).await.map_err(db_err)?;
        Ok(Some(partner_to_record(updated)))
    }
}

pub(crate) fn partner_to_record(model: partners::Model) -> PartnerRecord {
    PartnerRecord {
        id: PartnerId::new(model.id),
        name: model.name,
        email: model.email,
        api_key: model.api_key,
        api_secret_hash: model.api_secret_hash,
        status: status_from_db(model.status),
        pricing_tier: match model.pricing_tier {
            PricingTierDb::Tier1 => PricingTier::Tier1,
            PricingTierDb::Tier2 => PricingTier::Tier2,
            PricingTierDb::Tier3 => PricingTier::Tier3,
        },
        price_per_gb: model.price_per_gb,
        balance: model.balance,
        total_usage_gb: model.total_usage_gb,
        total_spent: model.total_spent,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

pub(crate) fn status_from_db(status: PartnerStatusDb) -> PartnerStatus {
    match status {
        PartnerStatusDb::Active => PartnerStatus::Active,
        PartnerStatusDb::Inactive => PartnerStatus::Inactive,
        PartnerStatusDb::Suspended => PartnerStatus::Suspended,
    }
}

fn status_to_db(status: PartnerStatus) -> PartnerStatusDb {
    match status {
        PartnerStatus::Active => PartnerStatusDb::Active,
        PartnerStatus::Inactive => PartnerStatusDb::Inactive,
        PartnerStatus::Suspended => PartnerStatusDb::Suspended,
    }
}

fn tier_to_db(tier: PricingTier) -> PricingTierDb {
    match tier {
        PricingTier::Tier1 => PricingTierDb::Tier1,
        PricingTier::Tier2 => PricingTierDb::Tier2,
        PricingTier::Tier3 => PricingTierDb::Tier3,
    }
}
