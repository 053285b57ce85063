use serde::{Deserialize, Serialize};

use crate::gateway::GatewayError;
use crate::models::PaymentStatus;

/// Inbound gateway notification. Only the fields the core reads are modelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub order_id: Option<String>,
    pub status_code: Option<String>,
    pub gross_amount: Option<String>,
    pub signature_key: Option<String>,
    pub transaction_status: Option<String>,
    pub fraud_status: Option<String>,
    pub transaction_id: Option<String>,
}

impl NotificationPayload {
    pub(crate) fn required<'a>(
        &self,
        name: &'static str,
        field: &'a Option<String>,
    ) -> Result<&'a str, GatewayError> {
        field.as_deref().ok_or(GatewayError::MissingField(name))
    }

    pub fn transaction_id(&self) -> Result<&str, GatewayError> {
        self.required("transaction_id", &self.transaction_id)
    }

    /// Status this notification asks for, `None` when it should be ignored.
    pub fn requested_status(&self) -> Option<PaymentStatus> {
        map_transaction_status(
            self.transaction_status.as_deref()?,
            self.fraud_status.as_deref(),
        )
    }
}

/// Maps a gateway `transaction_status` (plus `fraud_status` for captures).
pub fn map_transaction_status(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> Option<PaymentStatus> {
    match transaction_status {
        "capture" => match fraud_status {
            Some("accept") => Some(PaymentStatus::Success),
            // held for manual review
            Some("challenge") => Some(PaymentStatus::Pending),
            _ => None,
        },
        "settlement" => Some(PaymentStatus::Success),
        "deny" | "cancel" | "expire" => Some(PaymentStatus::Failed),
        "pending" => Some(PaymentStatus::Pending),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_depends_on_fraud_status() {
        assert_eq!(
            map_transaction_status("capture", Some("accept")),
            Some(PaymentStatus::Success)
        );
        assert_eq!(
            map_transaction_status("capture", Some("challenge")),
            Some(PaymentStatus::Pending)
        );
        assert_eq!(map_transaction_status("capture", None), None);
    }

    #[test]
    fn terminal_statuses() {
        assert_eq!(
            map_transaction_status("settlement", None),
            Some(PaymentStatus::Success)
        );
        for status in ["deny", "cancel", "expire"] {
            assert_eq!(
                map_transaction_status(status, None),
                Some(PaymentStatus::Failed)
            );
        }
        assert_eq!(
            map_transaction_status("pending", None),
            Some(PaymentStatus::Pending)
        );
    }

    #[test]
    fn unknown_statuses_are_ignored() {
        assert_eq!(map_transaction_status("refund", None), None);
        assert_eq!(NotificationPayload::default().requested_status(), None);
    }
}
