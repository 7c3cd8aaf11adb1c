//! Outbox dispatcher
//!
//! Order changes write their emails and pushes to the outbox in the same
//! transaction. The lifecycle attempts them right after commit through
//! [`OutboxDispatcher::dispatch_now`]; rows that are still undelivered after the
//! grace period are claimed and retried by [`OutboxDispatcher::run`] until they
//! run out of attempts. Delivered rows are pruned once they pass the retention
//! window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::gateways::{self, Mailer, Notifier};
use crate::store::{OutboxEvent, OutboxStore, SharedStore, StoreResult};

#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub poll_interval: Duration,
    pub batch: u32,
    pub max_attempts: u32,
    /// Bound on a single email or push.
    pub delivery_timeout: Duration,
    /// Rows younger than this belong to the immediate attempt.
    pub grace: Duration,
    /// How long a claimed batch is hidden from other dispatchers.
    pub claim_lease: Duration,
    /// Delivered rows older than this are deleted.
    pub retention: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            batch: 50,
            max_attempts: 10,
            delivery_timeout: Duration::from_secs(10),
            grace: Duration::from_secs(30),
            claim_lease: Duration::from_secs(600),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Outcome of delivering a set of outbox rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub email_failed: bool,
    pub push_failed: bool,
}

pub struct OutboxDispatcher {
    store: SharedStore,
    mailer: Arc<dyn Mailer>,
    notifier: Arc<dyn Notifier>,
    settings: OutboxSettings,
}

impl OutboxDispatcher {
    pub fn new(
        store: SharedStore,
        mailer: Arc<dyn Mailer>,
        notifier: Arc<dyn Notifier>,
        settings: OutboxSettings,
    ) -> Self {
        Self { store, mailer, notifier, settings }
    }

    /// Attempts `events` once each. Failures are recorded on the row and
    /// reported, never returned as errors.
    pub async fn dispatch_now(&self, events: &[OutboxEvent]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for event in events {
            if self.attempt(event).await {
                report.delivered += 1;
            } else if event.delivery.channel() == "email" {
                report.email_failed = true;
            } else {
                report.push_failed = true;
            }
        }
        report
    }

    async fn attempt(&self, event: &OutboxEvent) -> bool {
        let result = gateways::deliver(
            &event.delivery,
            self.mailer.as_ref(),
            self.notifier.as_ref(),
            self.settings.delivery_timeout,
        )
        .await;

        match result {
            Ok(()) => {
                if let Err(e) = self.store.mark_delivered(event.id, Utc::now()).await {
                    // The row stays pending and may be sent twice; delivery itself succeeded.
                    warn!(outbox_id = event.id, error = %e, "Failed to mark outbox row delivered");
                }
                debug!(outbox_id = event.id, channel = event.delivery.channel(), "Delivered");
                true
            }
            Err(e) => {
                let attempts = event.attempts + 1;
                if attempts >= self.settings.max_attempts {
                    error!(outbox_id = event.id, channel = event.delivery.channel(), attempts, error = %e, "Giving up on delivery");
                } else {
                    warn!(outbox_id = event.id, channel = event.delivery.channel(), attempts, error = %e, "Delivery failed");
                }
                if let Err(e) = self.store.record_failure(event.id, &e.to_string()).await {
                    warn!(outbox_id = event.id, error = %e, "Failed to record delivery failure");
                }
                false
            }
        }
    }

    /// One retry pass over rows older than the grace period.
    pub async fn drain_once(&self) -> StoreResult<DispatchReport> {
        let now = Utc::now();
        let claimed = self
            .store
            .claim_deliveries(
                now,
                now - chrono_duration(self.settings.grace),
                now + chrono_duration(self.settings.claim_lease),
                self.settings.max_attempts,
                self.settings.batch,
            )
            .await?;
        if claimed.is_empty() {
            return Ok(DispatchReport::default());
        }
        let report = self.dispatch_now(&claimed).await;
        info!(picked = claimed.len(), delivered = report.delivered, "Outbox retry pass finished");
        Ok(report)
    }

    /// Deletes rows delivered before `now` minus the retention window.
    pub async fn prune_once(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let pruned = self.store.prune_delivered(now - chrono_duration(self.settings.retention)).await?;
        if pruned > 0 {
            info!(pruned, "Pruned delivered outbox rows");
        }
        Ok(pruned)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(poll_secs = self.settings.poll_interval.as_secs(), "Outbox dispatcher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {
                    if let Err(e) = self.drain_once().await {
                        error!(error = %e, "Outbox retry pass failed");
                    }
                    if let Err(e) = self.prune_once(Utc::now()).await {
                        warn!(error = %e, "Outbox prune failed");
                    }
                }
                _ = super::shutdown_requested(&mut shutdown) => {
                    info!("Outbox dispatcher stopped");
                    break;
                }
            }
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
