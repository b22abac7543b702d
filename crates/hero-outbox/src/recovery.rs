//! Periodic sweep that resets outbox entries stuck `InProgress` after a
//! processor crashed between claiming and publishing, so they get claimed
//! again instead of rotting forever.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::storage::OutboxStorage;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub check_interval: Duration,
    pub stuck_after: Duration,
    pub enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            stuck_after: Duration::from_secs(300),
            enabled: true,
        }
    }
}

pub struct RecoveryTask {
    storage: Arc<dyn OutboxStorage>,
    config: RecoveryConfig,
}

impl RecoveryTask {
    pub fn new(storage: Arc<dyn OutboxStorage>, config: RecoveryConfig) -> Self {
        Self { storage, config }
    }

    /// Runs the recovery ticker until `cancellation` fires. No-op if
    /// recovery is disabled.
    pub async fn run(&self, cancellation: CancellationToken) {
        if !self.config.enabled {
            return;
        }
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval) => {}
                _ = cancellation.cancelled() => break,
            }
            if let Err(err) = self.recover_once().await {
                tracing::error!(%err, "outbox recovery sweep failed");
            }
        }
    }

    async fn recover_once(&self) -> Result<(), hero_common::HeroError> {
        let recovered = self.storage.recover_stuck(self.config.stuck_after).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "reset stuck outbox entries to pending");
        }
        Ok(())
    }
}
