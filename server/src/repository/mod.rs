//! Storage seams. `PgStore` backs production, `InMemoryStore` backs tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::{order_total, NewOrder, PricedLine};
use crate::models::{
    Event, EventPrice, Order, OrderDetails, OrderLineItem, Payment, PaymentStatus, Ticket,
};
use crate::utils::error::{AppError, Rule};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("price tier {price_id} does not belong to event {event_id}")]
    PriceEventMismatch { price_id: Uuid, event_id: Uuid },

    #[error("not enough quota for price tier {price_id}: requested {requested}, remaining {remaining}")]
    InsufficientQuota {
        price_id: Uuid,
        requested: i32,
        remaining: i32,
    },

    #[error("quota decrement for price tier {0} affected no rows")]
    LostUpdate(Uuid),

    #[error("order total overflows")]
    TotalOverflow,

    #[error("payment already exists for order {0}")]
    PaymentExists(Uuid),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Domain failures become business-rule errors, anything else is a system
    /// error attributed to `operation`.
    pub fn into_app(self, operation: &'static str) -> AppError {
        match self {
            StoreError::NotFound { entity, id } => {
                let rule = match entity {
                    "event" => Rule::EventNotFound,
                    "event price" => Rule::PriceNotFound,
                    "order" => Rule::OrderNotFound,
                    "payment" => Rule::PaymentNotFound,
                    _ => return AppError::system_message(operation, format!("{entity} {id} not found")),
                };
                AppError::rule(rule, format!("{entity} not found"))
            }
            err @ StoreError::PriceEventMismatch { .. } => {
                AppError::rule(Rule::PriceEventMismatch, err.to_string())
            }
            err @ (StoreError::InsufficientQuota { .. } | StoreError::LostUpdate(_)) => {
                AppError::rule(Rule::InsufficientQuota, format!("not enough quota for ticket: {err}"))
            }
            StoreError::TotalOverflow => {
                AppError::validation("tickets_ordered", "order total is too large", "overflow")
            }
            err @ StoreError::PaymentExists(_) => AppError::rule(Rule::PaymentExists, err.to_string()),
            StoreError::Database(e) => AppError::system(operation, e),
        }
    }
}

/// Outcome of marking an order paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaidOutcome {
    /// The order moved Pending → Paid in this call.
    NewlyPaid,
    /// The order was already paid; missing tickets (if any) were filled in.
    AlreadyPaid,
    /// The order had been cancelled; nothing was issued.
    Cancelled,
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    async fn find_price(&self, id: Uuid) -> Result<Option<EventPrice>, StoreError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Locks the requested ledger rows in ascending id order, checks quota,
    /// writes the order and its lines, and decrements quota, all in one
    /// transaction.
    async fn create_order_in_transaction(
        &self,
        order: NewOrder,
    ) -> Result<(Order, Vec<OrderLineItem>), StoreError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_order_details(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError>;

    /// Conditional Pending → Cancelled. Returns the order only when this call
    /// performed the transition.
    async fn claim_cancellation(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Marks the order paid and inserts whichever candidate tickets do not
    /// exist yet, atomically.
    async fn mark_paid_and_issue(
        &self,
        order_id: Uuid,
        tickets: Vec<Ticket>,
    ) -> Result<PaidOutcome, StoreError>;

    /// Returns reserved units to the pool. Commutative, needs no row lock.
    async fn restore_quota(&self, price_id: Uuid, quantity: i32) -> Result<(), StoreError>;

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>, StoreError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_payment_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Conditional Pending → `status`. `None` if the payment was not pending.
    async fn transition_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Payment>, StoreError>;
}

/// Prices every requested line against the locked ledger rows.
///
/// Shared by both stores so the quota check is identical everywhere.
pub(crate) fn price_lines(
    order: &NewOrder,
    locked: &[EventPrice],
) -> Result<Vec<PricedLine>, StoreError> {
    let by_id: HashMap<Uuid, &EventPrice> = locked.iter().map(|p| (p.id, p)).collect();

    let lines = order
        .tickets
        .iter()
        .map(|request| {
            let price = by_id.get(&request.price_id).ok_or(StoreError::NotFound {
                entity: "event price",
                id: request.price_id,
            })?;

            if price.event_id != order.event_id {
                return Err(StoreError::PriceEventMismatch {
                    price_id: price.id,
                    event_id: order.event_id,
                });
            }

            if price.quota < request.quantity {
                return Err(StoreError::InsufficientQuota {
                    price_id: price.id,
                    requested: request.quantity,
                    remaining: price.quota,
                });
            }

            PricedLine::new(price.id, request.quantity, price.price).ok_or(StoreError::TotalOverflow)
        })
        .collect::<Result<Vec<_>, _>>()?;

    order_total(&lines).ok_or(StoreError::TotalOverflow)?;
    Ok(lines)
}

/// Lock acquisition order for ledger rows.
pub(crate) fn lock_order(order: &NewOrder) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = order.tickets.iter().map(|t| t.price_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::TicketRequest;

    fn price(event_id: Uuid, price: i64, quota: i32) -> EventPrice {
        let now = Utc::now();
        EventPrice {
            id: Uuid::new_v4(),
            event_id,
            name: "Regular".to_string(),
            price,
            quota,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_order(event_id: Uuid, tickets: Vec<TicketRequest>) -> NewOrder {
        NewOrder {
            user_id: Uuid::new_v4(),
            event_id,
            payment_due: Utc::now(),
            tickets,
        }
    }

    #[test]
    fn prices_come_from_the_ledger() {
        let event_id = Uuid::new_v4();
        let a = price(event_id, 15_000, 10);
        let b = price(event_id, 9_999, 10);
        let order = new_order(
            event_id,
            vec![
                TicketRequest { price_id: a.id, quantity: 2 },
                TicketRequest { price_id: b.id, quantity: 1 },
            ],
        );

        let lines = price_lines(&order, &[a, b]).unwrap();
        assert_eq!(order_total(&lines), Some(39_999));
    }

    #[test]
    fn insufficient_quota_is_a_business_rule() {
        let event_id = Uuid::new_v4();
        let a = price(event_id, 100, 1);
        let order = new_order(event_id, vec![TicketRequest { price_id: a.id, quantity: 2 }]);

        let err = price_lines(&order, &[a]).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientQuota { remaining: 1, .. }));
        assert_eq!(
            err.into_app("create_order").violated_rule(),
            Some(Rule::InsufficientQuota)
        );
    }

    #[test]
    fn foreign_and_missing_tiers_are_rejected() {
        let event_id = Uuid::new_v4();
        let foreign = price(Uuid::new_v4(), 100, 5);
        let order = new_order(event_id, vec![TicketRequest { price_id: foreign.id, quantity: 1 }]);
        assert!(matches!(
            price_lines(&order, &[foreign]),
            Err(StoreError::PriceEventMismatch { .. })
        ));

        let order = new_order(event_id, vec![TicketRequest { price_id: Uuid::new_v4(), quantity: 1 }]);
        let err = price_lines(&order, &[]).unwrap_err();
        assert_eq!(err.into_app("create_order").violated_rule(), Some(Rule::PriceNotFound));
    }

    #[test]
    fn rows_are_locked_in_ascending_id_order() {
        let mut ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let order = new_order(
            Uuid::new_v4(),
            ids.iter().map(|id| TicketRequest { price_id: *id, quantity: 1 }).collect(),
        );
        ids.sort();
        assert_eq!(lock_order(&order), ids);
    }
}
