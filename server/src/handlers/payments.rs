use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use tracing::info;

use crate::gateway::NotificationPayload;
use crate::handlers::{json_body, parse_path_id, CallerId};
use crate::services::payments::{CreatePaymentInput, UpdatePaymentStatusInput};
use crate::state::AppState;
use crate::utils::error::{AppError, Rule};
use crate::utils::response::{accepted, created, success};

pub async fn create_payment(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    body: Result<Json<CreatePaymentInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let input = json_body(body)?;
    let payment = state.payment_service.create_payment(input, user_id).await?;
    Ok(created(payment, "Payment created"))
}

pub async fn get_payment(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(payment_id): Path<String>,
) -> Result<Response, AppError> {
    let payment_id = parse_path_id("payment_id", &payment_id)?;
    let payment = state.payment_service.payment(payment_id).await?;

    // Payments are visible to the owner of the order only.
    state
        .order_service
        .order_summary(payment.order_id, user_id)
        .await
        .map_err(|e| match e.violated_rule() {
            Some(Rule::OrderOwnership) => {
                AppError::rule(Rule::PaymentNotFound, "payment not found")
            }
            _ => e,
        })?;

    Ok(success(payment, "Payment retrieved"))
}

/// Administrative status change. Finalization runs in the background.
///
/// Requires the identity forwarded by the upstream authenticator.
pub async fn update_payment_status(
    State(state): State<AppState>,
    CallerId(operator_id): CallerId,
    Path(payment_id): Path<String>,
    body: Result<Json<UpdatePaymentStatusInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let payment_id = parse_path_id("payment_id", &payment_id)?;
    let input = json_body(body)?;
    info!(%payment_id, %operator_id, status = input.status.as_str(), "Payment status change requested");

    let payment = state
        .payment_service
        .update_payment_status(payment_id, input.status)
        .await?;
    Ok(accepted(payment, "Payment status updated"))
}

pub async fn payment_notification(
    State(state): State<AppState>,
    body: Result<Json<NotificationPayload>, JsonRejection>,
) -> Result<Response, AppError> {
    let payload = json_body(body)?;
    let outcome = state.payment_service.handle_notification(payload).await?;
    Ok(success(outcome, "Notification processed"))
}
