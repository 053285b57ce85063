use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub total_price: i64,
    pub status: OrderStatus,
    pub payment_due: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reserved quantity of one price tier. `price_per_unit` is captured when the
/// order is placed and never follows later price changes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderLineItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_price_id: Uuid,
    pub quantity: i32,
    pub price_per_unit: i64,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
}

/// A validated (price tier, quantity) pair from an order request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketRequest {
    pub price_id: Uuid,
    pub quantity: i32,
}

/// Input to the reservation transaction.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub payment_due: DateTime<Utc>,
    pub tickets: Vec<TicketRequest>,
}

/// A requested line priced from the locked ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub price_id: Uuid,
    pub quantity: i32,
    pub price_per_unit: i64,
    pub total_price: i64,
}

impl PricedLine {
    /// Prices a line, returning `None` when `quantity × price` overflows.
    pub fn new(price_id: Uuid, quantity: i32, price_per_unit: i64) -> Option<Self> {
        let total_price = price_per_unit.checked_mul(i64::from(quantity))?;
        Some(Self {
            price_id,
            quantity,
            price_per_unit,
            total_price,
        })
    }
}

/// Sum of line totals, `None` on overflow.
pub fn order_total(lines: &[PricedLine]) -> Option<i64> {
    lines
        .iter()
        .try_fold(0i64, |acc, line| acc.checked_add(line.total_price))
}

#[derive(Debug, Clone, Serialize)]
pub struct LineDetail {
    #[serde(flatten)]
    pub item: OrderLineItem,
    pub tier_name: String,
}

/// An order together with everything the finalize step needs to issue tickets.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub lines: Vec<LineDetail>,
    pub owner: Option<User>,
}
