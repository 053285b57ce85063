use async_trait::async_trait;
use tracing::info;

use crate::bus::{DomainEvent, EventHandler};
use crate::utils::error::AppError;

/// Writes one structured line per domain event.
#[derive(Debug, Default)]
pub struct AuditLogHandler;

#[async_trait]
impl EventHandler for AuditLogHandler {
    fn name(&self) -> &'static str {
        "audit_log"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::system("audit_log", e))?;

        info!(
            event = %event.kind(),
            order_id = %event.order_id(),
            payload = %payload,
            "Domain event"
        );
        Ok(())
    }
}
