//! Periodic release of orders whose payment deadline has passed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::repository::OrderRepository;
use crate::services::fulfillment::Fulfillment;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub cancelled: usize,
    /// Orders another actor finalized between the query and the claim.
    pub skipped: usize,
    pub failed: usize,
}

pub struct ExpirationScheduler {
    orders: Arc<dyn OrderRepository>,
    fulfillment: Arc<Fulfillment>,
    interval: Duration,
}

impl ExpirationScheduler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        fulfillment: Arc<Fulfillment>,
        interval: Duration,
    ) -> Self {
        Self {
            orders,
            fulfillment,
            interval,
        }
    }

    /// One pass over expired pending orders, handled one at a time.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let expired = match self.orders.find_expired_pending(now).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "Failed to query expired orders");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            found: expired.len(),
            ..SweepReport::default()
        };

        if expired.is_empty() {
            debug!("No expired orders");
            return report;
        }

        info!(count = expired.len(), "Found expired orders");

        for order in expired {
            match self.fulfillment.release_reservation(order.id).await {
                Ok(Some(_)) => {
                    report.cancelled += 1;
                    info!(order_id = %order.id, payment_due = %order.payment_due, "Expired order cancelled");
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(order_id = %order.id, error = %e, "Failed to cancel expired order");
                }
            }
        }

        report
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "Expiration scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiration scheduler stopped");
    }
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop and waits for the current sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Expiration scheduler task failed");
        }
    }
}
