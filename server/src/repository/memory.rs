use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::order::{order_total, LineDetail, NewOrder};
use crate::models::{
    Event, EventPrice, Order, OrderDetails, OrderLineItem, OrderStatus, Payment, PaymentStatus,
    Ticket, User,
};
use crate::repository::{
    lock_order, price_lines, CatalogRepository, OrderRepository, PaidOutcome, PaymentRepository,
    StoreError,
};

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, Event>,
    prices: HashMap<Uuid, EventPrice>,
    users: HashMap<Uuid, User>,
    orders: HashMap<Uuid, Order>,
    line_items: Vec<OrderLineItem>,
    tickets: Vec<Ticket>,
    payments: HashMap<Uuid, Payment>,
}

/// Store held entirely in memory. Every operation runs under one mutex, so
/// each call is atomic the way a committed transaction is.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    failing_ticket_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_event(&self, event: Event) {
        self.tables().events.insert(event.id, event);
    }

    pub fn insert_price(&self, price: EventPrice) {
        self.tables().prices.insert(price.id, price);
    }

    pub fn insert_user(&self, user: User) {
        self.tables().users.insert(user.id, user);
    }

    pub fn quota_of(&self, price_id: Uuid) -> Option<i32> {
        self.tables().prices.get(&price_id).map(|p| p.quota)
    }

    /// Units held by orders that have not been cancelled.
    pub fn reserved_units(&self, price_id: Uuid) -> i32 {
        let tables = self.tables();
        tables
            .line_items
            .iter()
            .filter(|li| li.event_price_id == price_id)
            .filter(|li| {
                tables
                    .orders
                    .get(&li.order_id)
                    .map_or(false, |o| o.status != OrderStatus::Cancelled)
            })
            .map(|li| li.quantity)
            .sum()
    }

    /// Moves an order's payment deadline, e.g. into the past.
    pub fn set_payment_due(&self, order_id: Uuid, payment_due: DateTime<Utc>) {
        if let Some(order) = self.tables().orders.get_mut(&order_id) {
            order.payment_due = payment_due;
        }
    }

    /// Makes the next `count` calls to `mark_paid_and_issue` fail.
    pub fn fail_next_ticket_writes(&self, count: usize) {
        self.failing_ticket_writes.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_ticket_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryStore {
    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.tables().events.get(&id).cloned())
    }

    async fn find_price(&self, id: Uuid) -> Result<Option<EventPrice>, StoreError> {
        Ok(self.tables().prices.get(&id).cloned())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn create_order_in_transaction(
        &self,
        new_order: NewOrder,
    ) -> Result<(Order, Vec<OrderLineItem>), StoreError> {
        let mut tables = self.tables();

        let locked: Vec<EventPrice> = lock_order(&new_order)
            .iter()
            .filter_map(|id| tables.prices.get(id).cloned())
            .collect();
        let lines = price_lines(&new_order, &locked)?;
        let total = order_total(&lines).ok_or(StoreError::TotalOverflow)?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: new_order.user_id,
            event_id: new_order.event_id,
            total_price: total,
            status: OrderStatus::Pending,
            payment_due: new_order.payment_due,
            created_at: now,
            updated_at: now,
        };

        let items: Vec<OrderLineItem> = lines
            .iter()
            .map(|line| OrderLineItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                event_price_id: line.price_id,
                quantity: line.quantity,
                price_per_unit: line.price_per_unit,
                total_price: line.total_price,
                created_at: now,
            })
            .collect();

        for line in &lines {
            if let Some(price) = tables.prices.get_mut(&line.price_id) {
                price.quota -= line.quantity;
                price.updated_at = now;
            }
        }
        tables.orders.insert(order.id, order.clone());
        tables.line_items.extend(items.iter().cloned());

        Ok((order, items))
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.tables().orders.get(&id).cloned())
    }

    async fn find_order_details(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError> {
        let tables = self.tables();
        let Some(order) = tables.orders.get(&id).cloned() else {
            return Ok(None);
        };

        let lines = tables
            .line_items
            .iter()
            .filter(|li| li.order_id == id)
            .map(|li| LineDetail {
                item: li.clone(),
                tier_name: tables
                    .prices
                    .get(&li.event_price_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default(),
            })
            .collect();
        let owner = tables.users.get(&order.user_id).cloned();

        Ok(Some(OrderDetails {
            order,
            lines,
            owner,
        }))
    }

    async fn claim_cancellation(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut tables = self.tables();
        match tables.orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_paid_and_issue(
        &self,
        order_id: Uuid,
        tickets: Vec<Ticket>,
    ) -> Result<PaidOutcome, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "injected ticket write failure".to_string(),
            )));
        }

        let mut tables = self.tables();
        let order = tables.orders.get_mut(&order_id).ok_or(StoreError::NotFound {
            entity: "order",
            id: order_id,
        })?;

        let outcome = match order.status {
            OrderStatus::Cancelled => return Ok(PaidOutcome::Cancelled),
            OrderStatus::Paid => PaidOutcome::AlreadyPaid,
            OrderStatus::Pending => {
                order.status = OrderStatus::Paid;
                order.updated_at = Utc::now();
                PaidOutcome::NewlyPaid
            }
        };

        for ticket in tickets {
            let exists = tables.tickets.iter().any(|t| {
                t.order_id == ticket.order_id
                    && t.line_item_id == ticket.line_item_id
                    && t.unit_index == ticket.unit_index
            });
            if !exists {
                tables.tickets.push(ticket);
            }
        }

        Ok(outcome)
    }

    async fn restore_quota(&self, price_id: Uuid, quantity: i32) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let price = tables.prices.get_mut(&price_id).ok_or(StoreError::NotFound {
            entity: "event price",
            id: price_id,
        })?;
        price.quota += quantity;
        price.updated_at = Utc::now();
        Ok(())
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .tables()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.payment_due < now)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.payment_due);
        Ok(orders)
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets: Vec<Ticket> = self
            .tables()
            .tickets
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.line_item_id, t.unit_index));
        Ok(tickets)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.payments.values().any(|p| p.order_id == payment.order_id) {
            return Err(StoreError::PaymentExists(payment.order_id));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables().payments.get(&id).cloned())
    }

    async fn find_payment_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .tables()
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn find_payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .tables()
            .payments
            .values()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Payment>, StoreError> {
        let mut tables = self.tables();
        match tables.payments.get_mut(&id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = status;
                payment.updated_at = Utc::now();
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::TicketRequest;
    use crate::models::ticket::tickets_for;
    use crate::models::EventStatus;

    fn seeded(quota: i32) -> (InMemoryStore, Uuid, Uuid) {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let event_id = Uuid::new_v4();
        let price_id = Uuid::new_v4();
        store.insert_event(Event {
            id: event_id,
            name: "Jazz Night".to_string(),
            status: EventStatus::Published,
            starts_at: now,
            sales_start_at: now,
            sales_end_at: now,
            created_at: now,
            updated_at: now,
        });
        store.insert_price(EventPrice {
            id: price_id,
            event_id,
            name: "Regular".to_string(),
            price: 15_000,
            quota,
            created_at: now,
            updated_at: now,
        });
        (store, event_id, price_id)
    }

    fn order_for(event_id: Uuid, price_id: Uuid, quantity: i32) -> NewOrder {
        NewOrder {
            user_id: Uuid::new_v4(),
            event_id,
            payment_due: Utc::now(),
            tickets: vec![TicketRequest { price_id, quantity }],
        }
    }

    #[tokio::test]
    async fn reservation_decrements_quota() {
        let (store, event_id, price_id) = seeded(5);
        let (order, items) = store
            .create_order_in_transaction(order_for(event_id, price_id, 2))
            .await
            .unwrap();

        assert_eq!(order.total_price, 30_000);
        assert_eq!(items.len(), 1);
        assert_eq!(store.quota_of(price_id), Some(3));
        assert_eq!(store.reserved_units(price_id), 2);
    }

    #[tokio::test]
    async fn failed_reservation_leaves_no_trace() {
        let (store, event_id, price_id) = seeded(1);
        let err = store
            .create_order_in_transaction(order_for(event_id, price_id, 2))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InsufficientQuota { .. }));
        assert_eq!(store.quota_of(price_id), Some(1));
        assert_eq!(store.reserved_units(price_id), 0);
    }

    #[tokio::test]
    async fn claim_is_won_once() {
        let (store, event_id, price_id) = seeded(5);
        let (order, _) = store
            .create_order_in_transaction(order_for(event_id, price_id, 1))
            .await
            .unwrap();

        assert!(store.claim_cancellation(order.id).await.unwrap().is_some());
        assert!(store.claim_cancellation(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn issuing_twice_keeps_one_ticket_per_unit() {
        let (store, event_id, price_id) = seeded(5);
        let (order, _) = store
            .create_order_in_transaction(order_for(event_id, price_id, 3))
            .await
            .unwrap();
        let details = store.find_order_details(order.id).await.unwrap().unwrap();

        let first = store
            .mark_paid_and_issue(order.id, tickets_for(&details, Utc::now()))
            .await
            .unwrap();
        let second = store
            .mark_paid_and_issue(order.id, tickets_for(&details, Utc::now()))
            .await
            .unwrap();

        assert_eq!(first, PaidOutcome::NewlyPaid);
        assert_eq!(second, PaidOutcome::AlreadyPaid);
        assert_eq!(store.tickets_for_order(order.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_orders_are_never_paid() {
        let (store, event_id, price_id) = seeded(5);
        let (order, _) = store
            .create_order_in_transaction(order_for(event_id, price_id, 1))
            .await
            .unwrap();
        store.claim_cancellation(order.id).await.unwrap();
        let details = store.find_order_details(order.id).await.unwrap().unwrap();

        let outcome = store
            .mark_paid_and_issue(order.id, tickets_for(&details, Utc::now()))
            .await
            .unwrap();
        assert_eq!(outcome, PaidOutcome::Cancelled);
        assert!(store.tickets_for_order(order.id).await.unwrap().is_empty());
    }
}
