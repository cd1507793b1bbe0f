use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::pool::CredentialPool;

/// Recurring refresh pass, owned by the process lifecycle rather than
/// fired and forgotten. Dropping (or `stop`ping) the task cancels it;
/// tests call `refresh_all` directly instead of waiting on the timer.
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// The first tick fires immediately, so freshly loaded entries get
    /// their tokens before the first interval elapses.
    pub fn start(pool: Arc<CredentialPool>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("refresh pass starting");
                pool.refresh_all().await;
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
