use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::jobs::{Job, JobTask};
use crate::models::PaymentStatus;
use crate::services::fulfillment::Fulfillment;
use crate::utils::error::AppError;

/// Turns a payment's terminal status into its effect on the order: tickets on
/// success, released quota on failure.
pub struct FinalizePaymentJob {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub status: PaymentStatus,
    fulfillment: Arc<Fulfillment>,
}

impl FinalizePaymentJob {
    pub fn new(
        payment_id: Uuid,
        order_id: Uuid,
        status: PaymentStatus,
        fulfillment: Arc<Fulfillment>,
    ) -> Self {
        Self {
            payment_id,
            order_id,
            status,
            fulfillment,
        }
    }

    pub fn into_job(self, retry_max: u32) -> Job {
        Job::new(format!("payment_update_{}", self.payment_id), Arc::new(self), retry_max)
    }
}

#[async_trait]
impl JobTask for FinalizePaymentJob {
    async fn run(&self) -> Result<(), AppError> {
        match self.status {
            PaymentStatus::Success => {
                self.fulfillment.complete_paid_order(self.order_id).await?;
            }
            PaymentStatus::Failed => {
                self.fulfillment
                    .cancel_and_announce(self.order_id, "payment failed")
                    .await?;
            }
            PaymentStatus::Pending => {
                debug!(payment_id = %self.payment_id, "Payment still pending, nothing to finalize");
            }
        }
        Ok(())
    }
}
