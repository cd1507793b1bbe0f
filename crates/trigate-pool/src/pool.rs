use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{info, warn};
use trigate_protocol::openai::models::ModelInfo;
use trigate_storage::{CredentialStore, StorageError};

use crate::entry::{CredentialEntry, CredentialId, EntrySnapshot, DEACTIVATION_THRESHOLD};
use crate::upstream::UpstreamAuth;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("credential validation failed: {0}")]
    Auth(String),
    #[error("credential {0} not found")]
    NotFound(CredentialId),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolCounts {
    pub total: usize,
    pub active: usize,
}

/// Shared credential set. Selection and counter updates happen under the
/// map lock; identity lookups, token exchanges, and persistence never do.
pub struct CredentialPool {
    entries: RwLock<HashMap<CredentialId, CredentialEntry>>,
    auth: Arc<dyn UpstreamAuth>,
    store: Arc<dyn CredentialStore>,
}

impl CredentialPool {
    pub fn new(auth: Arc<dyn UpstreamAuth>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            auth,
            store,
        }
    }

    /// Bulk load at process start. Entries come back without tokens; the
    /// first refresh pass makes them eligible.
    pub async fn load_from_store(&self) -> Result<usize, PoolError> {
        let records = self.store.get_all_active().await?;
        let mut entries = self.entries.write().await;
        let loaded = records.len();
        for record in records {
            entries.insert(
                record.id,
                CredentialEntry::new(
                    record.id,
                    record.raw_credential,
                    record.username,
                    record.tier,
                ),
            );
        }
        info!(count = loaded, "credential pool loaded from store");
        Ok(loaded)
    }

    /// Resolves the identity, upserts the persistent row, and installs the
    /// in-memory entry. A second add for the same username replaces the raw
    /// credential instead of creating a duplicate. The immediate token
    /// exchange is best-effort; its failure does not fail the add.
    pub async fn add_credential(&self, raw: &str, tier: &str) -> Result<CredentialId, PoolError> {
        let identity = self
            .auth
            .lookup_identity(raw)
            .await
            .map_err(|err| PoolError::Auth(err.to_string()))?;

        let id = self
            .store
            .upsert_by_identity(raw, Some(&identity.username), tier)
            .await?;

        {
            let mut entries = self.entries.write().await;
            // The store keyed the row by username; drop any stale entry that
            // held the same identity under a different id.
            entries.retain(|entry_id, entry| {
                *entry_id == id || entry.username.as_deref() != Some(identity.username.as_str())
            });
            let entry = entries.entry(id).or_insert_with(|| {
                CredentialEntry::new(
                    id,
                    raw.to_string(),
                    Some(identity.username.clone()),
                    tier.to_string(),
                )
            });
            entry.raw_credential = raw.to_string();
            entry.username = Some(identity.username.clone());
            entry.tier = tier.to_string();
            entry.active = true;
            entry.consecutive_errors = 0;
        }

        if let Err(err) = self.refresh_entry(id).await {
            warn!(credential_id = id, error = %err, "initial token exchange failed; refresh loop will retry");
        }
        info!(credential_id = id, username = %identity.username, "credential added");
        Ok(id)
    }

    /// Uniform random pick among eligible entries; bumps the request
    /// counter and last-used stamp of the winner. Never touches the
    /// network.
    pub async fn select_active(&self) -> Option<CredentialEntry> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.write().await;
        let eligible: Vec<CredentialId> = entries
            .values()
            .filter(|entry| entry.is_eligible(now))
            .map(|entry| entry.id)
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let id = eligible[rand::rng().random_range(0..eligible.len())];
        let entry = entries.get_mut(&id)?;
        entry.request_count += 1;
        entry.last_used_at = Some(now);
        Some(entry.clone())
    }

    /// Exchanges the stored raw credential for a fresh upstream token.
    /// The exchange runs outside the map lock; only the resulting state
    /// change is applied under it.
    pub async fn refresh_entry(&self, id: CredentialId) -> Result<(), PoolError> {
        let raw = {
            let entries = self.entries.read().await;
            let entry = entries.get(&id).ok_or(PoolError::NotFound(id))?;
            if !entry.active {
                // Permanently deactivated until a new raw credential
                // arrives for this identity.
                return Ok(());
            }
            entry.raw_credential.clone()
        };

        let exchange = self.auth.exchange_token(&raw).await;

        let deactivate = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(&id).ok_or(PoolError::NotFound(id))?;
            match &exchange {
                Ok(token) => {
                    entry.upstream_token = Some(token.token.clone());
                    entry.token_expires_at = Some(token.expires_at);
                    entry.consecutive_errors = 0;
                    false
                }
                Err(err) => {
                    entry.consecutive_errors += 1;
                    entry.upstream_token = None;
                    entry.token_expires_at = None;
                    warn!(
                        credential_id = id,
                        consecutive_errors = entry.consecutive_errors,
                        error = %err,
                        "token exchange failed"
                    );
                    if entry.consecutive_errors >= DEACTIVATION_THRESHOLD && entry.active {
                        entry.active = false;
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if deactivate {
            warn!(credential_id = id, "credential deactivated after repeated exchange failures");
            self.store.deactivate(id).await?;
        }
        if let Err(err) = exchange {
            return Err(PoolError::Auth(err.to_string()));
        }
        Ok(())
    }

    /// Refreshes every entry; one entry's failure never blocks or fails
    /// the others.
    pub async fn refresh_all(&self) {
        let ids: Vec<CredentialId> = self.entries.read().await.keys().copied().collect();
        for id in ids {
            if let Err(err) = self.refresh_entry(id).await {
                warn!(credential_id = id, error = %err, "refresh failed");
            }
        }
    }

    /// Failure accounting for dispatch errors made with an entry's token.
    /// Distinct from exchange failure: the token is kept.
    pub async fn report_error(&self, id: CredentialId) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.consecutive_errors += 1;
        }
    }

    pub async fn remove(&self, id: CredentialId) -> Result<bool, PoolError> {
        let existed = self.entries.write().await.remove(&id).is_some();
        let deleted = self.store.delete(id).await?;
        Ok(existed || deleted)
    }

    pub async fn remove_all(&self) -> Result<u64, PoolError> {
        self.entries.write().await.clear();
        Ok(self.store.delete_all().await?)
    }

    pub async fn counts(&self) -> PoolCounts {
        let entries = self.entries.read().await;
        PoolCounts {
            total: entries.len(),
            active: entries.values().filter(|entry| entry.active).count(),
        }
    }

    pub async fn statistics(&self) -> Vec<EntrySnapshot> {
        let entries = self.entries.read().await;
        let mut stats: Vec<EntrySnapshot> =
            entries.values().map(CredentialEntry::snapshot).collect();
        stats.sort_by_key(|snapshot| snapshot.id);
        stats
    }

    pub async fn get(&self, id: CredentialId) -> Option<CredentialEntry> {
        self.entries.read().await.get(&id).cloned()
    }

    /// Caches the capability list fetched lazily by dispatch code.
    pub async fn set_models(&self, id: CredentialId, models: Vec<ModelInfo>) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.models = Some(models);
        }
    }
}
