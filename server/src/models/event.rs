use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::error::{AppError, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
    pub sales_start_at: DateTime<Utc>,
    pub sales_end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Fails unless the event is published and `now` lies inside its sales window.
    pub fn ensure_on_sale(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.status != EventStatus::Published {
            return Err(AppError::rule(
                Rule::EventNotPublished,
                "event is not published",
            ));
        }

        if now < self.sales_start_at || now > self.sales_end_at {
            return Err(AppError::rule(
                Rule::SalesWindowClosed,
                "event is not within sales period",
            ));
        }

        Ok(())
    }
}

/// One price tier of an event. `quota` is the remaining sellable count.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventPrice {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: i64,
    pub quota: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(status: EventStatus) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            name: "Jazz Night".to_string(),
            status,
            starts_at: now + Duration::days(30),
            sales_start_at: now - Duration::days(1),
            sales_end_at: now + Duration::days(1),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn published_event_inside_window_is_on_sale() {
        assert!(event(EventStatus::Published)
            .ensure_on_sale(Utc::now())
            .is_ok());
    }

    #[test]
    fn draft_event_is_not_on_sale() {
        let err = event(EventStatus::Draft)
            .ensure_on_sale(Utc::now())
            .unwrap_err();
        assert_eq!(err.violated_rule(), Some(Rule::EventNotPublished));
    }

    #[test]
    fn sales_window_bounds_are_enforced() {
        let event = event(EventStatus::Published);
        let err = event
            .ensure_on_sale(event.sales_end_at + Duration::seconds(1))
            .unwrap_err();
        assert_eq!(err.violated_rule(), Some(Rule::SalesWindowClosed));

        let err = event
            .ensure_on_sale(event.sales_start_at - Duration::seconds(1))
            .unwrap_err();
        assert_eq!(err.violated_rule(), Some(Rule::SalesWindowClosed));
    }
}
