use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;

use crate::handlers::{json_body, parse_path_id, CallerId};
use crate::services::orders::{CancelOrderInput, CreateOrderInput};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn create_order(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    body: Result<Json<CreateOrderInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let input = json_body(body)?;
    let order = state.order_service.create_order(input, user_id).await?;
    Ok(created(order, "Order created"))
}

pub async fn get_order(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    let order_id = parse_path_id("order_id", &order_id)?;
    let order = state.order_service.order_summary(order_id, user_id).await?;
    Ok(success(order, "Order retrieved"))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(order_id): Path<String>,
    body: Option<Json<CancelOrderInput>>,
) -> Result<Response, AppError> {
    let order_id = parse_path_id("order_id", &order_id)?;
    let reason = body.and_then(|Json(input)| input.reason);

    let order = state
        .order_service
        .cancel_order(order_id, user_id, reason)
        .await?;
    Ok(success(order, "Order cancelled"))
}
