use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{DomainEvent, EventBus};
use crate::gateway::{ChargeReference, GatewayError, NotificationPayload, PaymentGateway};
use crate::jobs::{FinalizePaymentJob, JobQueue};
use crate::lock::IdempotencyLock;
use crate::models::payment::ChargeChannel;
use crate::models::{OrderStatus, Payment, PaymentMethod, PaymentStatus};
use crate::repository::{OrderRepository, PaymentRepository};
use crate::services::fulfillment::Fulfillment;
use crate::utils::error::{AppError, Rule};

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentInput {
    pub order_id: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UpdatePaymentStatusInput {
    pub status: PaymentStatus,
}

/// What a gateway notification led to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "payment", rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// Status the core does not act on.
    Ignored,
    Unchanged(Payment),
    Updated(Payment),
}

#[derive(Debug, Clone, Copy)]
pub struct PaymentPolicy {
    pub lock_ttl: Duration,
    pub retry_max: u32,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            retry_max: 3,
        }
    }
}

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    orders: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    lock: IdempotencyLock,
    bus: Arc<EventBus>,
    jobs: Arc<JobQueue>,
    fulfillment: Arc<Fulfillment>,
    policy: PaymentPolicy,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        lock: IdempotencyLock,
        bus: Arc<EventBus>,
        jobs: Arc<JobQueue>,
        fulfillment: Arc<Fulfillment>,
        policy: PaymentPolicy,
    ) -> Self {
        Self {
            payments,
            orders,
            gateway,
            lock,
            bus,
            jobs,
            fulfillment,
            policy,
        }
    }

    pub async fn create_payment(
        &self,
        input: CreatePaymentInput,
        user_id: Uuid,
    ) -> Result<Payment, AppError> {
        let order_id = Uuid::parse_str(input.order_id.trim())
            .map_err(|_| AppError::validation("order_id", "must be a valid id", &input.order_id))?;

        let order = self
            .orders
            .find_order(order_id)
            .await
            .map_err(|e| e.into_app("create_payment"))?
            .ok_or_else(|| AppError::rule(Rule::OrderNotFound, "order not found"))?;

        if order.user_id != user_id {
            return Err(AppError::rule(
                Rule::OrderOwnership,
                "you are not authorized to pay for this order",
            ));
        }

        if order.status != OrderStatus::Pending {
            return Err(AppError::rule(
                Rule::OrderStatus,
                "only pending orders can be paid",
            ));
        }

        if order.payment_due < Utc::now() {
            return Err(AppError::rule(
                Rule::OrderStatus,
                "payment window for this order has closed",
            ));
        }

        let existing = self
            .payments
            .find_payment_by_order(order_id)
            .await
            .map_err(|e| e.into_app("create_payment"))?;
        if existing.is_some() {
            return Err(AppError::rule(
                Rule::PaymentExists,
                "payment already exists for this order",
            ));
        }

        let reference = self
            .charge(input.payment_method, &order_id.to_string(), order.total_price)
            .await
            .map_err(|e| AppError::system("create_payment", e))?;

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id,
            method: input.payment_method,
            transaction_id: reference.transaction_id,
            amount: order.total_price,
            status: PaymentStatus::Pending,
            gateway_details: Json(reference.details),
            created_at: now,
            updated_at: now,
        };

        self.payments
            .insert_payment(&payment)
            .await
            .map_err(|e| e.into_app("create_payment"))?;

        info!(
            payment_id = %payment.id,
            order_id = %order_id,
            method = ?payment.method,
            amount = payment.amount,
            "Payment created"
        );

        self.bus
            .publish(DomainEvent::PaymentCreated {
                payment_id: payment.id,
                order_id,
                method: payment.method,
                amount: payment.amount,
                created_at: payment.created_at,
            })
            .await;

        Ok(payment)
    }

    async fn charge(
        &self,
        method: PaymentMethod,
        order_ref: &str,
        amount: i64,
    ) -> Result<ChargeReference, GatewayError> {
        match method.channel() {
            ChargeChannel::BankTransfer { bank } => {
                self.gateway.charge_bank_transfer(order_ref, amount, bank).await
            }
            ChargeChannel::Wallet => self.gateway.charge_wallet(order_ref, amount).await,
            ChargeChannel::ConvenienceStore { store } => {
                let message = format!("Payment for order {order_ref}");
                self.gateway
                    .charge_convenience_store(order_ref, amount, store, &message)
                    .await
            }
        }
    }

    pub async fn payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.payments
            .find_payment(payment_id)
            .await
            .map_err(|e| e.into_app("payment"))?
            .ok_or_else(|| AppError::rule(Rule::PaymentNotFound, "payment not found"))
    }

    pub async fn payment_for_order(&self, order_id: Uuid) -> Result<Payment, AppError> {
        self.payments
            .find_payment_by_order(order_id)
            .await
            .map_err(|e| e.into_app("payment_for_order"))?
            .ok_or_else(|| AppError::rule(Rule::PaymentNotFound, "payment not found for this order"))
    }

    /// Moves a pending payment to `status` and queues its finalization.
    ///
    /// Re-applying the current status is a no-op. Changing a finalized payment
    /// is rejected.
    pub async fn update_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Payment, AppError> {
        let (payment, changed) = self
            .lock
            .with_lock(
                IdempotencyLock::payment_key(payment_id),
                self.policy.lock_ttl,
                || self.transition(payment_id, status),
            )
            .await?;

        if changed {
            self.bus
                .publish(DomainEvent::PaymentStatusUpdated {
                    payment_id,
                    order_id: payment.order_id,
                    status,
                    updated_at: payment.updated_at,
                })
                .await;
        }

        Ok(payment)
    }

    async fn transition(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(Payment, bool), AppError> {
        let current = self.payment(payment_id).await?;

        if current.status == status {
            return Ok((current, false));
        }

        if current.status.is_terminal() {
            return Err(AppError::rule(
                Rule::PaymentFinalized,
                format!("payment is already {}", current.status.as_str()),
            ));
        }

        let updated = self
            .payments
            .transition_status(payment_id, status)
            .await
            .map_err(|e| e.into_app("update_payment_status"))?
            .ok_or_else(|| AppError::rule(Rule::PaymentFinalized, "payment is already finalized"))?;

        info!(
            payment_id = %payment_id,
            order_id = %updated.order_id,
            status = status.as_str(),
            "Payment status updated"
        );

        let job = FinalizePaymentJob::new(
            payment_id,
            updated.order_id,
            status,
            Arc::clone(&self.fulfillment),
        )
        .into_job(self.policy.retry_max);

        if !self.jobs.enqueue(job) {
            error!(
                payment_id = %payment_id,
                order_id = %updated.order_id,
                status = status.as_str(),
                "Finalize job dropped, order needs manual reconciliation"
            );
        }

        Ok((updated, true))
    }

    /// Applies an authenticated gateway notification.
    pub async fn handle_notification(
        &self,
        payload: NotificationPayload,
    ) -> Result<NotificationOutcome, AppError> {
        let authentic = self
            .gateway
            .verify_notification(&payload)
            .map_err(notification_error)?;
        if !authentic {
            return Err(AppError::rule(
                Rule::InvalidSignature,
                "invalid notification signature",
            ));
        }

        let Some(status) = payload.requested_status() else {
            info!(
                transaction_status = ?payload.transaction_status,
                fraud_status = ?payload.fraud_status,
                "Notification status ignored"
            );
            return Ok(NotificationOutcome::Ignored);
        };

        let transaction_id = payload.transaction_id().map_err(notification_error)?;
        let payment = self
            .payments
            .find_payment_by_transaction(transaction_id)
            .await
            .map_err(|e| e.into_app("handle_notification"))?
            .ok_or_else(|| AppError::rule(Rule::PaymentNotFound, "payment not found"))?;

        if payment.status == status {
            return Ok(NotificationOutcome::Unchanged(payment));
        }

        // Gateways redeliver on any non-2xx, so a late change is acknowledged.
        if payment.status.is_terminal() {
            return Ok(self.late_notification(payment, status));
        }

        match self.update_payment_status(payment.id, status).await {
            Ok(updated) => Ok(NotificationOutcome::Updated(updated)),
            Err(e) if e.violated_rule() == Some(Rule::PaymentFinalized) => {
                let current = self.payment(payment.id).await?;
                Ok(self.late_notification(current, status))
            }
            Err(e) => Err(e),
        }
    }

    fn late_notification(&self, payment: Payment, requested: PaymentStatus) -> NotificationOutcome {
        warn!(
            payment_id = %payment.id,
            stored = payment.status.as_str(),
            requested = requested.as_str(),
            "Notification for finalized payment ignored"
        );
        NotificationOutcome::Unchanged(payment)
    }
}

fn notification_error(err: GatewayError) -> AppError {
    match err {
        GatewayError::MissingField(field) => {
            AppError::validation(field, "is required", "")
        }
        other => AppError::system("handle_notification", other),
    }
}
