mod device_flow;
mod entry;
mod pool;
mod refresh;
mod upstream;

pub use device_flow::{CompleteOutcome, DeviceFlow};
pub use entry::{CredentialEntry, CredentialId, EntrySnapshot, DEACTIVATION_THRESHOLD};
pub use pool::{CredentialPool, PoolCounts, PoolError};
pub use refresh::RefreshTask;
pub use upstream::{
    DeviceAuthorization, DevicePoll, ExchangedToken, Identity, UpstreamAuth, UpstreamAuthError,
};
