//! Device-code acquisition: a non-blocking single check for remote
//! pollers plus a blocking loop for local callers, wrapped in a
//! single-flight guard so overlapping completion polls for one device
//! code cannot create duplicate credentials.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::entry::CredentialId;
use crate::pool::{CredentialPool, PoolError};
use crate::upstream::{DeviceAuthorization, DevicePoll, UpstreamAuth, UpstreamAuthError};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompleteOutcome {
    Complete {
        id: CredentialId,
        username: Option<String>,
    },
    Pending,
    SlowDown,
    /// Another completion request for the same device code is mid-add.
    Processing,
    Denied,
    Expired,
}

pub struct DeviceFlow {
    pool: Arc<CredentialPool>,
    auth: Arc<dyn UpstreamAuth>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl DeviceFlow {
    pub fn new(pool: Arc<CredentialPool>, auth: Arc<dyn UpstreamAuth>) -> Self {
        Self {
            pool,
            auth,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn start(&self) -> Result<DeviceAuthorization, UpstreamAuthError> {
        self.auth.start_device_flow().await
    }

    /// One poll attempt. Upstream pending/slow-down answers map to
    /// caller-visible statuses so a remote client can drive its own loop.
    pub async fn complete_once(
        &self,
        device_code: &str,
        tier: &str,
    ) -> Result<CompleteOutcome, PoolError> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight, device_code) else {
            return Ok(CompleteOutcome::Processing);
        };

        let poll = self
            .auth
            .poll_device(device_code)
            .await
            .map_err(|err| PoolError::Auth(err.to_string()))?;

        match poll {
            DevicePoll::Authorized { raw_credential } => {
                let id = self.pool.add_credential(&raw_credential, tier).await?;
                let username = self.pool.get(id).await.and_then(|entry| entry.username);
                info!(credential_id = id, "device flow completed");
                Ok(CompleteOutcome::Complete { id, username })
            }
            DevicePoll::Pending => Ok(CompleteOutcome::Pending),
            DevicePoll::SlowDown => Ok(CompleteOutcome::SlowDown),
            DevicePoll::Denied => Ok(CompleteOutcome::Denied),
            DevicePoll::Expired => Ok(CompleteOutcome::Expired),
        }
    }

    /// Poll until a terminal outcome, sleeping `interval + 1` seconds
    /// between checks. For a local caller; remote clients use
    /// `complete_once`.
    pub async fn wait_blocking(
        &self,
        device_code: &str,
        tier: &str,
        interval: u64,
    ) -> Result<CompleteOutcome, PoolError> {
        loop {
            match self.complete_once(device_code, tier).await? {
                CompleteOutcome::Pending
                | CompleteOutcome::SlowDown
                | CompleteOutcome::Processing => {
                    tokio::time::sleep(Duration::from_secs(interval + 1)).await;
                }
                outcome => return Ok(outcome),
            }
        }
    }
}

/// Removes the device code from the in-flight set on every exit path,
/// including panics and early returns.
struct FlightGuard<'a> {
    codes: &'a Mutex<HashSet<String>>,
    code: String,
}

impl<'a> FlightGuard<'a> {
    fn acquire(codes: &'a Mutex<HashSet<String>>, code: &str) -> Option<Self> {
        let mut set = codes.lock().ok()?;
        if !set.insert(code.to_string()) {
            return None;
        }
        Some(Self {
            codes,
            code: code.to_string(),
        })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.codes.lock() {
            set.remove(&self.code);
        }
    }
}
