//! In-process publish/subscribe.
//!
//! `publish` runs every subscribed handler on its own task and waits for all of
//! them. A failing or panicking handler is logged and never reaches the
//! publisher or the other handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use crate::models::{PaymentMethod, PaymentStatus};
use crate::utils::error::AppError;

pub mod handlers;

pub use handlers::AuditLogHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderCreated,
    OrderPaid,
    OrderCancelled,
    PaymentCreated,
    PaymentStatusUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::OrderCreated,
        EventKind::OrderPaid,
        EventKind::OrderCancelled,
        EventKind::PaymentCreated,
        EventKind::PaymentStatusUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreated => "order.created",
            EventKind::OrderPaid => "order.paid",
            EventKind::OrderCancelled => "order.cancelled",
            EventKind::PaymentCreated => "payment.created",
            EventKind::PaymentStatusUpdated => "payment.status.updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_price: i64,
        created_at: DateTime<Utc>,
    },
    OrderPaid {
        order_id: Uuid,
        user_id: Uuid,
        total_price: i64,
        paid_at: DateTime<Utc>,
    },
    OrderCancelled {
        order_id: Uuid,
        user_id: Uuid,
        reason: String,
        cancelled_at: DateTime<Utc>,
    },
    PaymentCreated {
        payment_id: Uuid,
        order_id: Uuid,
        method: PaymentMethod,
        amount: i64,
        created_at: DateTime<Utc>,
    },
    PaymentStatusUpdated {
        payment_id: Uuid,
        order_id: Uuid,
        status: PaymentStatus,
        updated_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::OrderCreated { .. } => EventKind::OrderCreated,
            DomainEvent::OrderPaid { .. } => EventKind::OrderPaid,
            DomainEvent::OrderCancelled { .. } => EventKind::OrderCancelled,
            DomainEvent::PaymentCreated { .. } => EventKind::PaymentCreated,
            DomainEvent::PaymentStatusUpdated { .. } => EventKind::PaymentStatusUpdated,
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            DomainEvent::OrderCreated { order_id, .. }
            | DomainEvent::OrderPaid { order_id, .. }
            | DomainEvent::OrderCancelled { order_id, .. }
            | DomainEvent::PaymentCreated { order_id, .. }
            | DomainEvent::PaymentStatusUpdated { order_id, .. } => *order_id,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError>;
}

/// What happened during one `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub handlers: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        debug!(event = %kind, handler = handler.name(), "Handler subscribed");
        handlers.entry(kind).or_default().push(handler);
    }

    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        for kind in EventKind::ALL {
            self.subscribe(kind, Arc::clone(&handler));
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&kind).map_or(0, Vec::len)
    }

    pub async fn publish(&self, event: DomainEvent) -> PublishReport {
        let kind = event.kind();
        let subscribed: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&kind).cloned().unwrap_or_default()
        };

        if subscribed.is_empty() {
            return PublishReport::default();
        }

        let event = Arc::new(event);
        let tasks: Vec<_> = subscribed
            .into_iter()
            .map(|handler| {
                let event = Arc::clone(&event);
                let name = handler.name();
                (name, tokio::spawn(async move { handler.handle(&event).await }))
            })
            .collect();

        let mut report = PublishReport {
            handlers: tasks.len(),
            failed: 0,
        };

        for (name, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(event = %kind, handler = name, error = %e, "Event handler failed");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(event = %kind, handler = name, error = %e, "Event handler panicked");
                }
            }
        }

        report
    }
}
