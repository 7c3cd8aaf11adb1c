//! Sale expiry sweeper
//!
//! The only writer that clears finished sales. Read paths never persist the
//! correction; they gate the sale on its window instead.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::store::{CatalogStore, SharedStore, StoreResult};

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    pub interval: Duration,
    /// Wait after a failed cycle before trying again.
    pub retry_backoff: Duration,
    pub batch: u32,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self { interval: Duration::from_secs(3600), retry_backoff: Duration::from_secs(30), batch: 100 }
    }
}

pub struct SaleExpirySweeper {
    store: SharedStore,
    settings: SweeperSettings,
}

impl SaleExpirySweeper {
    pub fn new(store: SharedStore, settings: SweeperSettings) -> Self {
        Self { store, settings }
    }

    /// Clears every sale that ended before `now`, one bounded batch at a time.
    /// Returns how many books were cleared; a second run finds nothing.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let batch = self.settings.batch.max(1);
        let mut cleared = 0;
        loop {
            let ids = self.store.clear_expired_sales(now, batch).await?;
            cleared += ids.len();
            if !ids.is_empty() {
                debug!(?ids, "Cleared expired sales");
            }
            if ids.len() < batch as usize {
                break;
            }
        }
        Ok(cleared)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.settings.interval.as_secs(), "Sale expiry sweeper started");
        loop {
            let wait = match self.sweep_once(Utc::now()).await {
                Ok(0) => {
                    debug!("No expired sales found");
                    self.settings.interval
                }
                Ok(count) => {
                    info!(count, "Cleared expired sales");
                    self.settings.interval
                }
                Err(e) => {
                    error!(error = %e, retry_secs = self.settings.retry_backoff.as_secs(), "Sale expiry sweep failed");
                    self.settings.retry_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = super::shutdown_requested(&mut shutdown) => break,
            }
        }
        info!("Sale expiry sweeper stopped");
    }
}
