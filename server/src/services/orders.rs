use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::bus::{DomainEvent, EventBus};
use crate::lock::IdempotencyLock;
use crate::models::order::{NewOrder, TicketRequest};
use crate::models::{Order, OrderLineItem, OrderStatus, Ticket};
use crate::repository::{CatalogRepository, OrderRepository};
use crate::services::fulfillment::Fulfillment;
use crate::utils::error::{AppError, Rule};

const MAX_QUANTITY_PER_LINE: i32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct TicketOrderInput {
    pub price_id: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub event_id: String,
    pub tickets_ordered: Vec<TicketOrderInput>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CancelOrderInput {
    pub reason: Option<String>,
}

/// An order as returned to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    #[serde(flatten)]
    pub order: Order,
    pub line_items: Vec<OrderLineItem>,
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderPolicy {
    pub max_tickets_per_order: i32,
    pub payment_window: chrono::Duration,
    pub lock_ttl: Duration,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            max_tickets_per_order: 4,
            payment_window: chrono::Duration::hours(24),
            lock_ttl: Duration::from_secs(300),
        }
    }
}

pub struct OrderService {
    catalog: Arc<dyn CatalogRepository>,
    orders: Arc<dyn OrderRepository>,
    lock: IdempotencyLock,
    bus: Arc<EventBus>,
    fulfillment: Arc<Fulfillment>,
    policy: OrderPolicy,
}

impl OrderService {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        orders: Arc<dyn OrderRepository>,
        lock: IdempotencyLock,
        bus: Arc<EventBus>,
        fulfillment: Arc<Fulfillment>,
        policy: OrderPolicy,
    ) -> Self {
        Self {
            catalog,
            orders,
            lock,
            bus,
            fulfillment,
            policy,
        }
    }

    pub async fn create_order(
        &self,
        input: CreateOrderInput,
        user_id: Uuid,
    ) -> Result<OrderSummary, AppError> {
        let event_id = parse_id("event_id", &input.event_id)?;
        let tickets = parse_tickets(&input.tickets_ordered)?;

        let event = self
            .catalog
            .find_event(event_id)
            .await
            .map_err(|e| e.into_app("create_order"))?
            .ok_or_else(|| AppError::rule(Rule::EventNotFound, "event not found"))?;

        let now = Utc::now();
        event.ensure_on_sale(now)?;

        let requested: i32 = tickets.iter().map(|t| t.quantity).sum();
        if requested > self.policy.max_tickets_per_order {
            return Err(AppError::rule(
                Rule::OrderLimitExceeded,
                format!(
                    "cannot order more than {} tickets at once",
                    self.policy.max_tickets_per_order
                ),
            ));
        }

        let new_order = NewOrder {
            user_id,
            event_id,
            payment_due: now + self.policy.payment_window,
            tickets,
        };

        let (order, line_items) = self
            .lock
            .with_lock(
                IdempotencyLock::order_key(user_id, event_id),
                self.policy.lock_ttl,
                move || async move {
                    self.orders
                        .create_order_in_transaction(new_order)
                        .await
                        .map_err(|e| e.into_app("create_order"))
                },
            )
            .await?;

        info!(
            order_id = %order.id,
            user_id = %user_id,
            event_id = %event_id,
            total_price = order.total_price,
            "Order reserved"
        );

        self.bus
            .publish(DomainEvent::OrderCreated {
                order_id: order.id,
                user_id,
                total_price: order.total_price,
                created_at: order.created_at,
            })
            .await;

        Ok(OrderSummary {
            order,
            line_items,
            tickets: Vec::new(),
        })
    }

    /// The caller's order with its lines and any issued tickets.
    pub async fn order_summary(&self, order_id: Uuid, user_id: Uuid) -> Result<OrderSummary, AppError> {
        let details = self
            .orders
            .find_order_details(order_id)
            .await
            .map_err(|e| e.into_app("order_summary"))?
            .ok_or_else(|| AppError::rule(Rule::OrderNotFound, "order not found"))?;

        if details.order.user_id != user_id {
            return Err(AppError::rule(
                Rule::OrderOwnership,
                "order does not belong to this user",
            ));
        }

        let tickets = self
            .orders
            .tickets_for_order(order_id)
            .await
            .map_err(|e| e.into_app("order_summary"))?;

        Ok(OrderSummary {
            order: details.order,
            line_items: details.lines.into_iter().map(|l| l.item).collect(),
            tickets,
        })
    }

    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        let order = self
            .orders
            .find_order(order_id)
            .await
            .map_err(|e| e.into_app("cancel_order"))?
            .ok_or_else(|| AppError::rule(Rule::OrderNotFound, "order not found"))?;

        if order.user_id != user_id {
            return Err(AppError::rule(
                Rule::OrderOwnership,
                "order does not belong to this user",
            ));
        }

        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Cancelled => {
                return Err(AppError::rule(Rule::OrderStatus, "order is already cancelled"))
            }
            OrderStatus::Paid => {
                return Err(AppError::rule(
                    Rule::OrderStatus,
                    "paid orders cannot be cancelled manually",
                ))
            }
        }

        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "cancelled by user".to_string());

        let cancelled = self
            .fulfillment
            .cancel_and_announce(order_id, &reason)
            .await?
            .ok_or_else(|| AppError::rule(Rule::OrderStatus, "order is no longer pending"))?;

        info!(order_id = %order_id, user_id = %user_id, reason = %reason, "Order cancelled by owner");
        Ok(cancelled)
    }
}

fn parse_id(field: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::validation(field, "must be a valid id", raw))
}

fn parse_tickets(lines: &[TicketOrderInput]) -> Result<Vec<TicketRequest>, AppError> {
    if lines.is_empty() {
        return Err(AppError::validation(
            "tickets_ordered",
            "at least one ticket must be ordered",
            "[]",
        ));
    }

    let mut seen = HashSet::with_capacity(lines.len());
    lines
        .iter()
        .map(|line| {
            let price_id = parse_id("tickets_ordered.price_id", &line.price_id)?;

            if !(1..=MAX_QUANTITY_PER_LINE).contains(&line.quantity) {
                return Err(AppError::validation(
                    "tickets_ordered.quantity",
                    format!("quantity must be between 1 and {MAX_QUANTITY_PER_LINE}"),
                    line.quantity,
                ));
            }

            if !seen.insert(price_id) {
                return Err(AppError::validation(
                    "tickets_ordered.price_id",
                    "each price may appear only once",
                    price_id,
                ));
            }

            Ok(TicketRequest {
                price_id,
                quantity: line.quantity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price_id: &str, quantity: i32) -> TicketOrderInput {
        TicketOrderInput {
            price_id: price_id.to_string(),
            quantity,
        }
    }

    #[test]
    fn rejects_malformed_ticket_lines() {
        let id = Uuid::new_v4().to_string();

        assert!(parse_tickets(&[]).is_err());
        assert!(parse_tickets(&[line("not-an-id", 1)]).is_err());
        assert!(parse_tickets(&[line(&id, 0)]).is_err());
        assert!(parse_tickets(&[line(&id, 11)]).is_err());

        let err = parse_tickets(&[line(&id, 1), line(&id, 2)]).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "tickets_ordered.price_id"));
    }

    #[test]
    fn accepts_well_formed_lines() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let parsed = parse_tickets(&[line(&a.to_string(), 2), line(&b.to_string(), 1)]).unwrap();

        assert_eq!(
            parsed,
            vec![
                TicketRequest { price_id: a, quantity: 2 },
                TicketRequest { price_id: b, quantity: 1 },
            ]
        );
    }
}
