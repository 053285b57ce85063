use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod orders;
pub mod payments;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "boxoffice-api",
    };

    success(payload, "Health check successful")
}

/// The authenticated caller, as forwarded by the upstream authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::validation(USER_ID_HEADER, "header is required", ""))?
            .to_str()
            .map_err(|_| AppError::validation(USER_ID_HEADER, "must be valid text", "<binary>"))?;

        Uuid::parse_str(raw.trim())
            .map(CallerId)
            .map_err(|_| AppError::validation(USER_ID_HEADER, "must be a valid id", raw))
    }
}

pub(crate) fn parse_path_id(name: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::validation(name, "must be a valid id", raw))
}

/// Unwraps a JSON body, reporting malformed input in the API error envelope.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::validation("body", rejection.body_text(), "<request body>"))
}
