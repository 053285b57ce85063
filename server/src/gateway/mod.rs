//! Payment gateway capability contract.
//!
//! The core never speaks a gateway's wire protocol. It asks for a charge and
//! gets back a reference to persist, and it asks the gateway whether an inbound
//! notification is authentic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod notification;
pub mod sandbox;
pub mod signature;

pub use notification::{map_transaction_status, NotificationPayload};
pub use sandbox::SandboxGateway;

/// Gateway-specific fields returned by a charge. Opaque to the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biller_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReference {
    pub transaction_id: String,
    pub details: GatewayDetails,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("charge rejected: {0}")]
    Rejected(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("invalid notification payload: {0} missing")]
    MissingField(&'static str),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge_bank_transfer(
        &self,
        order_ref: &str,
        amount: i64,
        bank: &str,
    ) -> Result<ChargeReference, GatewayError>;

    async fn charge_wallet(&self, order_ref: &str, amount: i64)
        -> Result<ChargeReference, GatewayError>;

    async fn charge_convenience_store(
        &self,
        order_ref: &str,
        amount: i64,
        store: &str,
        message: &str,
    ) -> Result<ChargeReference, GatewayError>;

    /// `Ok(false)` means the payload is well formed but not authentic.
    fn verify_notification(&self, payload: &NotificationPayload) -> Result<bool, GatewayError>;
}
