use serde::Serialize;
use time::OffsetDateTime;
use trigate_protocol::openai::models::ModelInfo;

pub type CredentialId = i64;

/// Consecutive exchange failures before an entry is permanently
/// deactivated.
pub const DEACTIVATION_THRESHOLD: u32 = 3;

/// One backend credential and its derived runtime state.
#[derive(Debug, Clone)]
pub struct CredentialEntry {
    pub id: CredentialId,
    pub raw_credential: String,
    pub username: Option<String>,
    pub tier: String,
    pub upstream_token: Option<String>,
    pub token_expires_at: Option<OffsetDateTime>,
    pub active: bool,
    pub request_count: u64,
    pub consecutive_errors: u32,
    pub last_used_at: Option<OffsetDateTime>,
    /// Lazily cached capability list; used to default per-request output
    /// limits when a client omits max_tokens.
    pub models: Option<Vec<ModelInfo>>,
}

impl CredentialEntry {
    pub fn new(
        id: CredentialId,
        raw_credential: String,
        username: Option<String>,
        tier: String,
    ) -> Self {
        Self {
            id,
            raw_credential,
            username,
            tier,
            upstream_token: None,
            token_expires_at: None,
            active: true,
            request_count: 0,
            consecutive_errors: 0,
            last_used_at: None,
            models: None,
        }
    }

    /// Eligible means selectable for dispatch: active, with a token that
    /// has not expired. An active entry awaiting its first exchange is
    /// not eligible.
    pub fn is_eligible(&self, now: OffsetDateTime) -> bool {
        self.active
            && self.upstream_token.is_some()
            && self.token_expires_at.is_some_and(|expiry| expiry > now)
    }

    pub fn max_output_tokens_for(&self, model: &str) -> Option<i64> {
        self.models
            .as_ref()?
            .iter()
            .find(|info| info.id == model)
            .and_then(|info| info.max_output_tokens)
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            id: self.id,
            username: self.username.clone(),
            tier: self.tier.clone(),
            active: self.active,
            has_token: self.upstream_token.is_some(),
            token_expires_at: self.token_expires_at.map(OffsetDateTime::unix_timestamp),
            request_count: self.request_count,
            consecutive_errors: self.consecutive_errors,
            last_used_at: self.last_used_at.map(OffsetDateTime::unix_timestamp),
        }
    }
}

/// Per-entry stats for the tokens listing; never carries the raw
/// credential or the upstream token.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub id: CredentialId,
    pub username: Option<String>,
    pub tier: String,
    pub active: bool,
    pub has_token: bool,
    pub token_expires_at: Option<i64>,
    pub request_count: u64,
    pub consecutive_errors: u32,
    pub last_used_at: Option<i64>,
}
