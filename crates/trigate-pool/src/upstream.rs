//! The thin slice of upstream I/O the pool needs: identity lookup, token
//! exchange, and the device-code endpoints. Implemented over HTTP in the
//! core crate; tests substitute in-memory fakes.

use async_trait::async_trait;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamAuthError {
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("transport: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
}

/// Short-lived token obtained by exchanging a raw credential.
#[derive(Debug, Clone)]
pub struct ExchangedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    /// Suggested seconds between polls.
    pub interval: u64,
}

#[derive(Debug, Clone)]
pub enum DevicePoll {
    /// The user approved the code; the provider handed back a credential.
    Authorized { raw_credential: String },
    Pending,
    SlowDown,
    Denied,
    Expired,
}

#[async_trait]
pub trait UpstreamAuth: Send + Sync {
    async fn lookup_identity(&self, raw: &str) -> Result<Identity, UpstreamAuthError>;
    async fn exchange_token(&self, raw: &str) -> Result<ExchangedToken, UpstreamAuthError>;
    async fn start_device_flow(&self) -> Result<DeviceAuthorization, UpstreamAuthError>;
    async fn poll_device(&self, device_code: &str) -> Result<DevicePoll, UpstreamAuthError>;
}
