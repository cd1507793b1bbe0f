use async_trait::async_trait;
use time::OffsetDateTime;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

/// One persisted credential row. `username` stays null until the first
/// successful identity lookup.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: i64,
    pub raw_credential: String,
    pub username: Option<String>,
    pub tier: String,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

/// Durable credential table. The pool loads from it at boot and writes
/// through it on add/deactivate/delete; runtime selection never hits it.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0). Run once at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn get_all_active(&self) -> StorageResult<Vec<CredentialRecord>>;

    /// Inserts a new row, or replaces the raw credential (and reactivates)
    /// when a row with the same resolved username already exists.
    async fn upsert_by_identity(
        &self,
        raw: &str,
        username: Option<&str>,
        tier: &str,
    ) -> StorageResult<i64>;

    async fn deactivate(&self, id: i64) -> StorageResult<()>;

    /// Returns whether the id existed.
    async fn delete(&self, id: i64) -> StorageResult<bool>;

    /// Returns the number of rows removed.
    async fn delete_all(&self) -> StorageResult<u64>;
}
