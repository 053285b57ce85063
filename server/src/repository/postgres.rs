use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
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

const EVENT_COLUMNS: &str =
    "id, name, status, starts_at, sales_start_at, sales_end_at, created_at, updated_at";
const PRICE_COLUMNS: &str = "id, event_id, name, price, quota, created_at, updated_at";
const ORDER_COLUMNS: &str =
    "id, user_id, event_id, total_price, status, payment_due, created_at, updated_at";
const LINE_COLUMNS: &str =
    "id, order_id, event_price_id, quantity, price_per_unit, total_price, created_at";
const PAYMENT_COLUMNS: &str =
    "id, order_id, method, transaction_id, amount, status, gateway_details, created_at, updated_at";

#[derive(FromRow)]
struct LineRow {
    id: Uuid,
    order_id: Uuid,
    event_price_id: Uuid,
    quantity: i32,
    price_per_unit: i64,
    total_price: i64,
    created_at: DateTime<Utc>,
    tier_name: String,
}

impl From<LineRow> for LineDetail {
    fn from(row: LineRow) -> Self {
        LineDetail {
            item: OrderLineItem {
                id: row.id,
                order_id: row.order_id,
                event_price_id: row.event_price_id,
                quantity: row.quantity,
                price_per_unit: row.price_per_unit,
                total_price: row.total_price,
                created_at: row.created_at,
            },
            tier_name: row.tier_name,
        }
    }
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn find_price(&self, id: Uuid) -> Result<Option<EventPrice>, StoreError> {
        let price = sqlx::query_as::<_, EventPrice>(&format!(
            "SELECT {PRICE_COLUMNS} FROM event_prices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(price)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn create_order_in_transaction(
        &self,
        new_order: NewOrder,
    ) -> Result<(Order, Vec<OrderLineItem>), StoreError> {
        let ids = lock_order(&new_order);
        let mut tx = self.pool.begin().await?;

        // Row locks are taken in ascending id order by a single statement.
        let locked = sqlx::query_as::<_, EventPrice>(&format!(
            "SELECT {PRICE_COLUMNS} FROM event_prices WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let lines = price_lines(&new_order, &locked)?;
        let total = order_total(&lines).ok_or(StoreError::TotalOverflow)?;

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (id, user_id, event_id, total_price, status, payment_due)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new_order.user_id)
        .bind(new_order.event_id)
        .bind(total)
        .bind(OrderStatus::Pending)
        .bind(new_order.payment_due)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = sqlx::query_as::<_, OrderLineItem>(&format!(
                r#"
                INSERT INTO order_line_items
                    (id, order_id, event_price_id, quantity, price_per_unit, total_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {LINE_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(order.id)
            .bind(line.price_id)
            .bind(line.quantity)
            .bind(line.price_per_unit)
            .bind(line.total_price)
            .fetch_one(&mut *tx)
            .await?;

            let decremented = sqlx::query(
                r#"
                UPDATE event_prices
                SET quota = quota - $2, updated_at = NOW()
                WHERE id = $1 AND quota >= $2
                "#,
            )
            .bind(line.price_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;

            if decremented.rows_affected() == 0 {
                return Err(StoreError::LostUpdate(line.price_id));
            }

            items.push(item);
        }

        tx.commit().await?;
        debug!(order_id = %order.id, total, "Reservation committed");

        Ok((order, items))
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn find_order_details(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError> {
        let Some(order) = self.find_order(id).await? else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT li.id, li.order_id, li.event_price_id, li.quantity, li.price_per_unit,
                   li.total_price, li.created_at, ep.name AS tier_name
            FROM order_line_items li
            JOIN event_prices ep ON ep.id = li.event_price_id
            WHERE li.order_id = $1
            ORDER BY li.created_at, li.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let owner = sqlx::query_as::<_, User>(
            "SELECT id, name, email, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(order.user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(OrderDetails {
            order,
            lines: lines.into_iter().map(LineDetail::from).collect(),
            owner,
        }))
    }

    async fn claim_cancellation(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(OrderStatus::Cancelled)
        .bind(OrderStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn mark_paid_and_issue(
        &self,
        order_id: Uuid,
        tickets: Vec<Ticket>,
    ) -> Result<PaidOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match status {
            None => {
                return Err(StoreError::NotFound {
                    entity: "order",
                    id: order_id,
                })
            }
            Some(OrderStatus::Cancelled) => return Ok(PaidOutcome::Cancelled),
            Some(OrderStatus::Paid) => PaidOutcome::AlreadyPaid,
            Some(OrderStatus::Pending) => {
                sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
                    .bind(order_id)
                    .bind(OrderStatus::Paid)
                    .execute(&mut *tx)
                    .await?;
                PaidOutcome::NewlyPaid
            }
        };

        let mut inserted = 0u64;
        for ticket in &tickets {
            let result = sqlx::query(
                r#"
                INSERT INTO tickets (id, order_id, line_item_id, unit_index, event_price_id,
                                     price, ticket_type, code, owner_name, owner_email, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (order_id, line_item_id, unit_index) DO NOTHING
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.order_id)
            .bind(ticket.line_item_id)
            .bind(ticket.unit_index)
            .bind(ticket.event_price_id)
            .bind(ticket.price)
            .bind(&ticket.ticket_type)
            .bind(&ticket.code)
            .bind(&ticket.owner_name)
            .bind(&ticket.owner_email)
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!(order_id = %order_id, ?outcome, inserted, "Order marked paid");

        Ok(outcome)
    }

    async fn restore_quota(&self, price_id: Uuid, quantity: i32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE event_prices SET quota = quota + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(price_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "event price",
                id: price_id,
            });
        }
        Ok(())
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = $1 AND payment_due < $2
            ORDER BY payment_due
            "#
        ))
        .bind(OrderStatus::Pending)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let tickets = sqlx::query_as::<_, Ticket>(
            r#"
            SELECT id, order_id, line_item_id, unit_index, event_price_id, price, ticket_type,
                   code, owner_name, owner_email, created_at
            FROM tickets
            WHERE order_id = $1
            ORDER BY line_item_id, unit_index
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, method, transaction_id, amount, status,
                                  gateway_details, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.method)
        .bind(&payment.transaction_id)
        .bind(payment.amount)
        .bind(payment.status)
        .bind(&payment.gateway_details)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::PaymentExists(payment.order_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn find_payment_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn find_payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(PaymentStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }
}
