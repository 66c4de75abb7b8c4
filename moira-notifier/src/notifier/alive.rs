//! Periodic notifier-state watcher.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Notifier;
use crate::domain::NotifierState;

impl Notifier {
    /// Whether the notifier state flag in the store is `OK`.
    pub async fn is_alive(&self) -> bool {
        matches!(self.core.store.get_notifier_state().await, Ok(NotifierState::Ok))
    }

    /// Read the state flag once and mark the alive gauge with the outcome.
    pub async fn check_alive(&self) -> bool {
        let alive = match self.core.store.get_notifier_state().await {
            Ok(NotifierState::Ok) => true,
            Ok(state) => {
                debug!(state = %state, "Notifier is not alive");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to read notifier state");
                false
            }
        };
        self.core.metrics.mark_alive(alive);
        alive
    }

    /// Mark the alive gauge every state-check period until `cancel` fires.
    pub async fn run_alive_watcher(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.core.config.check_notifier_state_timeout());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Alive watcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_alive().await;
                }
            }
        }

        info!("Alive watcher stopped");
    }
}
