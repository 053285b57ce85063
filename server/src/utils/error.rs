use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::utils::response::error as error_response;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Domain rules that can block an operation.
///
/// The string form is stable and is what clients see in the error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    EventNotFound,
    EventNotPublished,
    SalesWindowClosed,
    PriceNotFound,
    PriceEventMismatch,
    OrderLimitExceeded,
    InsufficientQuota,
    RequestInFlight,
    OrderNotFound,
    OrderOwnership,
    OrderStatus,
    PaymentNotFound,
    PaymentExists,
    PaymentFinalized,
    InvalidSignature,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::EventNotFound => "event_exists",
            Rule::EventNotPublished => "event_published",
            Rule::SalesWindowClosed => "event_sales_window",
            Rule::PriceNotFound => "price_exists",
            Rule::PriceEventMismatch => "price_belongs_to_event",
            Rule::OrderLimitExceeded => "max_tickets_per_order",
            Rule::InsufficientQuota => "quota_available",
            Rule::RequestInFlight => "request_in_flight",
            Rule::OrderNotFound => "order_exists",
            Rule::OrderOwnership => "order_authorization",
            Rule::OrderStatus => "order_status",
            Rule::PaymentNotFound => "payment_exists",
            Rule::PaymentExists => "payment_unique_per_order",
            Rule::PaymentFinalized => "payment_status",
            Rule::InvalidSignature => "notification_signature",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Rule::EventNotFound
            | Rule::PriceNotFound
            | Rule::OrderNotFound
            | Rule::PaymentNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error on field '{field}': {message} (value: {value})")]
    Validation {
        field: String,
        message: String,
        value: String,
    },

    #[error("business rule violation '{rule}': {message}")]
    BusinessRule { rule: Rule, message: String },

    #[error("system error in '{operation}': {message}")]
    System {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl AppError {
    pub fn validation(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl fmt::Display,
    ) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
            value: value.to_string(),
        }
    }

    pub fn rule(rule: Rule, message: impl Into<String>) -> Self {
        AppError::BusinessRule {
            rule,
            message: message.into(),
        }
    }

    pub fn system<E>(operation: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AppError::System {
            operation,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn system_message(operation: &'static str, message: impl Into<String>) -> Self {
        AppError::System {
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// The rule that blocked the operation, if this is a business-rule error.
    pub fn violated_rule(&self) -> Option<Rule> {
        match self {
            AppError::BusinessRule { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, AppError::System { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::BusinessRule { rule, .. } => rule.status_code(),
            AppError::System { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::BusinessRule { .. } => "BUSINESS_RULE_VIOLATION",
            AppError::System { .. } => "INTERNAL_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::Validation { field, message, .. } => {
                warn!(field = %field, message = %message, "Rejected invalid input");
            }
            AppError::BusinessRule { rule, message } => {
                warn!(rule = %rule, message = %message, "Business rule blocked request");
            }
            AppError::System {
                operation,
                message,
                source,
            } => {
                error!(operation, message = %message, source = ?source, "System error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let (public_message, details) = match &self {
            AppError::Validation {
                field,
                message,
                value,
            } => (
                message.clone(),
                Some(json!({ "field": field, "value": value })),
            ),
            AppError::BusinessRule { rule, message } => {
                (message.clone(), Some(json!({ "rule": rule.as_str() })))
            }
            AppError::System { .. } => ("An internal error occurred".to_string(), None),
        };

        error_response(status, code, public_message, details)
    }
}
