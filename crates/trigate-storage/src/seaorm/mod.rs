use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, QueryFilter, Schema,
};
use time::OffsetDateTime;

use crate::entities;
use crate::store::{CredentialRecord, CredentialStore, StorageResult};

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        // Ensure sqlite enforces foreign keys (required for integrity).
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn record_from_model(model: entities::credentials::Model) -> CredentialRecord {
    CredentialRecord {
        id: model.id,
        raw_credential: model.raw_credential,
        username: model.username,
        tier: model.tier,
        active: model.active,
        created_at: model.created_at,
    }
}

#[async_trait::async_trait]
impl CredentialStore for SeaOrmStore {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Credentials)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn get_all_active(&self) -> StorageResult<Vec<CredentialRecord>> {
        use entities::credentials::Column;
        let rows = entities::Credentials::find()
            .filter(Column::Active.eq(true))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(record_from_model).collect())
    }

    async fn upsert_by_identity(
        &self,
        raw: &str,
        username: Option<&str>,
        tier: &str,
    ) -> StorageResult<i64> {
        use entities::credentials::{ActiveModel as CredentialActive, Column};

        let now = OffsetDateTime::now_utc();
        let existing = match username {
            Some(username) => {
                entities::Credentials::find()
                    .filter(Column::Username.eq(username))
                    .one(&self.db)
                    .await?
            }
            None => None,
        };

        let id = match existing {
            Some(model) => {
                let mut active: CredentialActive = model.into();
                active.raw_credential = ActiveValue::Set(raw.to_string());
                active.tier = ActiveValue::Set(tier.to_string());
                active.active = ActiveValue::Set(true);
                active.updated_at = ActiveValue::Set(now);
                let updated = active.update(&self.db).await?;
                updated.id
            }
            None => {
                let active = CredentialActive {
                    id: ActiveValue::NotSet,
                    raw_credential: ActiveValue::Set(raw.to_string()),
                    username: ActiveValue::Set(username.map(|s| s.to_string())),
                    tier: ActiveValue::Set(tier.to_string()),
                    active: ActiveValue::Set(true),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                };
                let inserted = entities::Credentials::insert(active).exec(&self.db).await?;
                inserted.last_insert_id
            }
        };
        Ok(id)
    }

    async fn deactivate(&self, id: i64) -> StorageResult<()> {
        use entities::credentials::ActiveModel as CredentialActive;

        let Some(model) = entities::Credentials::find_by_id(id).one(&self.db).await? else {
            return Ok(());
        };
        let mut active: CredentialActive = model.into();
        active.active = ActiveValue::Set(false);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> StorageResult<bool> {
        let result = entities::Credentials::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let result = entities::Credentials::delete_many().exec(&self.db).await?;
        Ok(result.rows_affected)
    }
}
