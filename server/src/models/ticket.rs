use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::order::OrderDetails;
use crate::models::user::Holder;

const TICKET_CODE_LEN: usize = 10;

/// An issued ticket. `(order_id, line_item_id, unit_index)` identifies it, so a
/// retried issuance can never create a second ticket for the same unit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub line_item_id: Uuid,
    pub unit_index: i32,
    pub event_price_id: Uuid,
    pub price: i64,
    pub ticket_type: String,
    pub code: String,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TICKET_CODE_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}

/// One candidate ticket per purchased unit.
pub fn tickets_for(details: &OrderDetails, issued_at: DateTime<Utc>) -> Vec<Ticket> {
    let holder = Holder::of(details.owner.as_ref());

    details
        .lines
        .iter()
        .flat_map(|line| {
            let holder = holder.clone();
            (0..line.item.quantity).map(move |unit_index| Ticket {
                id: Uuid::new_v4(),
                order_id: line.item.order_id,
                line_item_id: line.item.id,
                unit_index,
                event_price_id: line.item.event_price_id,
                price: line.item.price_per_unit,
                ticket_type: line.tier_name.clone(),
                code: generate_code(),
                owner_name: holder.name.clone(),
                owner_email: holder.email.clone(),
                created_at: issued_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{LineDetail, Order, OrderLineItem, OrderStatus};
    use crate::models::user::User;

    fn details() -> OrderDetails {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let line = |quantity, price| LineDetail {
            item: OrderLineItem {
                id: Uuid::new_v4(),
                order_id,
                event_price_id: Uuid::new_v4(),
                quantity,
                price_per_unit: price,
                total_price: price * i64::from(quantity),
                created_at: now,
            },
            tier_name: "VIP".to_string(),
        };

        OrderDetails {
            order: Order {
                id: order_id,
                user_id: Uuid::new_v4(),
                event_id: Uuid::new_v4(),
                total_price: 39_999,
                status: OrderStatus::Pending,
                payment_due: now,
                created_at: now,
                updated_at: now,
            },
            lines: vec![line(2, 15_000), line(1, 9_999)],
            owner: Some(User {
                id: Uuid::new_v4(),
                name: "Sari".to_string(),
                email: "sari@example.com".to_string(),
                created_at: now,
                updated_at: now,
            }),
        }
    }

    #[test]
    fn one_ticket_per_unit_with_stable_identity() {
        let details = details();
        let tickets = tickets_for(&details, Utc::now());

        assert_eq!(tickets.len(), 3);
        let first_line = &details.lines[0].item;
        let units: Vec<i32> = tickets
            .iter()
            .filter(|t| t.line_item_id == first_line.id)
            .map(|t| t.unit_index)
            .collect();
        assert_eq!(units, vec![0, 1]);
        assert!(tickets.iter().all(|t| t.owner_email.as_deref() == Some("sari@example.com")));
    }

    #[test]
    fn codes_are_uppercase_alphanumeric() {
        let code = generate_code();
        assert_eq!(code.len(), TICKET_CODE_LEN);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
