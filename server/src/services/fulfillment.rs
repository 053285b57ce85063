use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{DomainEvent, EventBus};
use crate::models::ticket::tickets_for;
use crate::models::Order;
use crate::repository::{OrderRepository, PaidOutcome};
use crate::utils::error::{AppError, Rule};

/// Effects of an order reaching a terminal state.
///
/// Every method is safe to run more than once for the same order.
pub struct Fulfillment {
    orders: Arc<dyn OrderRepository>,
    bus: Arc<EventBus>,
}

impl Fulfillment {
    pub fn new(orders: Arc<dyn OrderRepository>, bus: Arc<EventBus>) -> Self {
        Self { orders, bus }
    }

    /// Marks the order paid and issues one ticket per purchased unit.
    pub async fn complete_paid_order(&self, order_id: Uuid) -> Result<PaidOutcome, AppError> {
        let details = self
            .orders
            .find_order_details(order_id)
            .await
            .map_err(|e| e.into_app("complete_paid_order"))?
            .ok_or_else(|| AppError::rule(Rule::OrderNotFound, "order not found"))?;

        let tickets = tickets_for(&details, Utc::now());
        let issued = tickets.len();

        let outcome = self
            .orders
            .mark_paid_and_issue(order_id, tickets)
            .await
            .map_err(|e| e.into_app("complete_paid_order"))?;

        match outcome {
            PaidOutcome::NewlyPaid => {
                info!(order_id = %order_id, tickets = issued, "Order paid, tickets issued");
                self.bus
                    .publish(DomainEvent::OrderPaid {
                        order_id,
                        user_id: details.order.user_id,
                        total_price: details.order.total_price,
                        paid_at: Utc::now(),
                    })
                    .await;
            }
            PaidOutcome::AlreadyPaid => {
                debug!(order_id = %order_id, "Order already paid");
            }
            PaidOutcome::Cancelled => {
                error!(
                    order_id = %order_id,
                    "Payment succeeded for a cancelled order, manual reconciliation required"
                );
            }
        }

        Ok(outcome)
    }

    /// Claims a pending order as cancelled and returns its reserved quota.
    ///
    /// `None` when the order was not pending, in which case nothing is touched.
    /// Restoration failures are logged; the cancellation stands.
    pub async fn release_reservation(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let Some(order) = self
            .orders
            .claim_cancellation(order_id)
            .await
            .map_err(|e| e.into_app("release_reservation"))?
        else {
            debug!(order_id = %order_id, "Order no longer pending, nothing to release");
            return Ok(None);
        };

        let details = match self.orders.find_order_details(order_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                error!(order_id = %order_id, "Cancelled order vanished before quota restore");
                return Ok(Some(order));
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Failed to load cancelled order lines, quota not restored");
                return Ok(Some(order));
            }
        };

        let mut restored = 0;
        for line in &details.lines {
            match self
                .orders
                .restore_quota(line.item.event_price_id, line.item.quantity)
                .await
            {
                Ok(()) => restored += 1,
                Err(e) => warn!(
                    order_id = %order_id,
                    price_id = %line.item.event_price_id,
                    quantity = line.item.quantity,
                    error = %e,
                    "Failed to restore quota"
                ),
            }
        }

        if restored < details.lines.len() {
            error!(
                order_id = %order_id,
                restored,
                lines = details.lines.len(),
                "Quota partially restored for cancelled order"
            );
        } else {
            info!(order_id = %order_id, lines = restored, "Reservation released");
        }

        Ok(Some(order))
    }

    /// Releases the reservation and announces the cancellation.
    pub async fn cancel_and_announce(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<Option<Order>, AppError> {
        let cancelled = self.release_reservation(order_id).await?;

        if let Some(order) = &cancelled {
            self.bus
                .publish(DomainEvent::OrderCancelled {
                    order_id,
                    user_id: order.user_id,
                    reason: reason.to_string(),
                    cancelled_at: order.updated_at,
                })
                .await;
        }

        Ok(cancelled)
    }
}
