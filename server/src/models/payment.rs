use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::gateway::GatewayDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    BankTransferBca,
    BankTransferBni,
    BankTransferBri,
    Gopay,
    Indomaret,
}

/// How a payment method is charged at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeChannel {
    BankTransfer { bank: &'static str },
    Wallet,
    ConvenienceStore { store: &'static str },
}

impl PaymentMethod {
    pub fn channel(&self) -> ChargeChannel {
        match self {
            PaymentMethod::BankTransferBca => ChargeChannel::BankTransfer { bank: "bca" },
            PaymentMethod::BankTransferBni => ChargeChannel::BankTransfer { bank: "bni" },
            PaymentMethod::BankTransferBri => ChargeChannel::BankTransfer { bank: "bri" },
            PaymentMethod::Gopay => ChargeChannel::Wallet,
            PaymentMethod::Indomaret => ChargeChannel::ConvenienceStore { store: "indomaret" },
        }
    }
}

/// One payment per order. Gateway-specific fields are carried through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub gateway_details: Json<GatewayDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_transfers_carry_their_bank_code() {
        assert_eq!(
            PaymentMethod::BankTransferBni.channel(),
            ChargeChannel::BankTransfer { bank: "bni" }
        );
        assert_eq!(PaymentMethod::Gopay.channel(), ChargeChannel::Wallet);
    }

    #[test]
    fn methods_use_wire_names() {
        let json = serde_json::to_string(&PaymentMethod::BankTransferBca).unwrap();
        assert_eq!(json, "\"BANK_TRANSFER_BCA\"");

        let status: PaymentStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(status, PaymentStatus::Failed);
        assert!(status.is_terminal());
    }
}
