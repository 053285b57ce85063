use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ticket owner. Accounts are managed elsewhere; the core only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Name and email printed on an issued ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Holder {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Holder {
    /// Holder details for an order owner, blank when the account is gone.
    pub fn of(owner: Option<&User>) -> Self {
        match owner {
            Some(user) => Self {
                name: Some(user.name.trim().to_string()).filter(|n| !n.is_empty()),
                email: Some(user.email.trim().to_ascii_lowercase()).filter(|e| !e.is_empty()),
            },
            None => Self::default(),
        }
    }
}
