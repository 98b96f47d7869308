use bandshare_domain::model::{
    ContributorId, ContributorTokenRecord, NewContributorToken, RevokeTokenRequest, TokenHash,
};
use bandshare_domain::storage::{StorageResult, TokenStore};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

use crate::entity::contributor_tokens;
use crate::{db_err, SeaOrmStorage};

#[async_trait::async_trait]
impl TokenStore for SeaOrmStorage {
    async fn insert_token(
        &self,
        token: NewContributorToken,
    ) -> StorageResult<ContributorTokenRecord> {
        let model = contributor_tokens::ActiveModel {
            token_hash: Set(token.token_hash.into_inner()),
            contributor_id: Set(token.contributor_id.into_inner()),
            issued_at: Set(token.issued_at),
            ..Default::default()
        };
        let created = model.insert(self.connection()).await.map_err(db_err)?;
        Ok(token_to_record(created))
    }

    async fn find_token(
        &self,
        token: &TokenHash,
    ) -> StorageResult<Option<ContributorTokenRecord>> {
        let maybe = contributor_tokens::Entity::find_by_id(token.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(db_err)?;
        Ok(maybe.map(token_to_record))
    }

    async fn revoke_token(
        &self,
        request: RevokeTokenRequest,
    ) -> StorageResult<Option<ContributorTokenRecord>> {
        let maybe = contributor_tokens::Entity::find_by_id(request.token_hash.as_str().to_owned())
            .one(self.connection())
            .await
            .map_err(db_err)?;
        let Some(model) = maybe else {
            return Ok(None);
        };

        if model.revoked_at.is_some() {
            return Ok(Some(token_to_record(model)));
        }

        let mut active: contributor_tokens::ActiveModel = model.into();
        active.revoked_at = Set(Some(Utc::now()));
        active.revoke_reason = Set(request.reason);
        let updated = active.update(self.connection()).await.map_err(db_err)?;
        Ok(Some(token_to_record(updated)))
    }
}

fn token_to_record(model: contributor_tokens::Model) -> ContributorTokenRecord {
    ContributorTokenRecord {
        token_hash: TokenHash::from_hex(model.token_hash),
        contributor_id: ContributorId::new(model.contributor_id),
        issued_at: model.issued_at,
        revoked_at: model.revoked_at,
        revoke_reason: model.revoke_reason,
    }
}
