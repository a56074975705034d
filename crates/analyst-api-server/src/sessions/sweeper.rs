use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::SessionStore;

/// Periodically purges expired sessions.
pub fn spawn_sweeper(store: SessionStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = store.cleanup_expired();
            debug!("Session sweep done: removed={}, remaining={}", removed, store.len());
        }
    })
}
