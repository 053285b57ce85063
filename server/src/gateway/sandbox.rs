use async_trait::async_trait;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::gateway::{
    signature, ChargeReference, GatewayDetails, GatewayError, NotificationPayload, PaymentGateway,
};

/// Gateway stand-in for development and tests.
///
/// Charges always succeed with freshly generated references. Notification
/// verification is the real signature check, keyed by `server_key`.
#[derive(Debug, Clone)]
pub struct SandboxGateway {
    server_key: String,
}

impl SandboxGateway {
    pub fn new(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
        }
    }

    /// Signs a notification the way the gateway would.
    pub fn sign(&self, order_id: &str, status_code: &str, gross_amount: &str) -> String {
        signature::sign(order_id, status_code, gross_amount, &self.server_key)
    }

    fn transaction_id() -> String {
        format!("sandbox-{}", Uuid::new_v4())
    }

    fn digits(len: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..len)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn charge_bank_transfer(
        &self,
        order_ref: &str,
        amount: i64,
        bank: &str,
    ) -> Result<ChargeReference, GatewayError> {
        let reference = ChargeReference {
            transaction_id: Self::transaction_id(),
            details: GatewayDetails {
                bank: Some(bank.to_string()),
                virtual_account_number: Some(Self::digits(12)),
                ..GatewayDetails::default()
            },
        };
        info!(order_ref, amount, bank, transaction_id = %reference.transaction_id, "Sandbox bank transfer charged");
        Ok(reference)
    }

    async fn charge_wallet(
        &self,
        order_ref: &str,
        amount: i64,
    ) -> Result<ChargeReference, GatewayError> {
        let transaction_id = Self::transaction_id();
        let reference = ChargeReference {
            details: GatewayDetails {
                redirect_url: Some(format!(
                    "https://sandbox.gateway.invalid/wallet/{transaction_id}"
                )),
                ..GatewayDetails::default()
            },
            transaction_id,
        };
        info!(order_ref, amount, transaction_id = %reference.transaction_id, "Sandbox wallet charged");
        Ok(reference)
    }

    async fn charge_convenience_store(
        &self,
        order_ref: &str,
        amount: i64,
        store: &str,
        message: &str,
    ) -> Result<ChargeReference, GatewayError> {
        let reference = ChargeReference {
            transaction_id: Self::transaction_id(),
            details: GatewayDetails {
                payment_code: Some(Self::digits(16)),
                ..GatewayDetails::default()
            },
        };
        info!(order_ref, amount, store, message, transaction_id = %reference.transaction_id, "Sandbox store payment charged");
        Ok(reference)
    }

    fn verify_notification(&self, payload: &NotificationPayload) -> Result<bool, GatewayError> {
        signature::verify(payload, &self.server_key)
    }
}
