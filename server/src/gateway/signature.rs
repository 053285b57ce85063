use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha512};

use crate::gateway::{GatewayError, NotificationPayload};

/// Hex-encoded `SHA-512(order_id ‖ status_code ‖ gross_amount ‖ server_key)`.
pub fn sign(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify(payload: &NotificationPayload, server_key: &str) -> Result<bool, GatewayError> {
    let order_id = payload.required("order_id", &payload.order_id)?;
    let status_code = payload.required("status_code", &payload.status_code)?;
    let gross_amount = payload.required("gross_amount", &payload.gross_amount)?;
    let signature_key = payload.required("signature_key", &payload.signature_key)?;

    let expected = sign(order_id, status_code, gross_amount, server_key);
    Ok(constant_time_eq(
        expected.as_bytes(),
        signature_key.as_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(gross_amount: &str, signature_key: String) -> NotificationPayload {
        NotificationPayload {
            order_id: Some("order-1".to_string()),
            status_code: Some("200".to_string()),
            gross_amount: Some(gross_amount.to_string()),
            signature_key: Some(signature_key),
            transaction_status: Some("settlement".to_string()),
            fraud_status: None,
            transaction_id: Some("tx-1".to_string()),
        }
    }

    #[test]
    fn signature_is_lowercase_hex_sha512() {
        let sig = sign("order-1", "200", "39999.00", "secret");
        assert_eq!(sig.len(), 128);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn known_vector() {
        // sha512("") is a fixed value; concatenating empty fields must hash to it.
        assert_eq!(
            sign("", "", "", ""),
            "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
             47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e"
        );
    }

    #[test]
    fn tampered_amount_is_rejected() {
        let sig = sign("order-1", "200", "39999.00", "secret");
        assert!(verify(&payload("39999.00", sig.clone()), "secret").unwrap());
        assert!(!verify(&payload("1.00", sig), "secret").unwrap());
    }

    #[test]
    fn wrong_server_key_is_rejected() {
        let sig = sign("order-1", "200", "39999.00", "other");
        assert!(!verify(&payload("39999.00", sig), "secret").unwrap());
    }

    #[test]
    fn missing_fields_are_reported() {
        let mut payload = payload("1.00", String::new());
        payload.signature_key = None;
        let err = verify(&payload, "secret").unwrap_err();
        assert!(matches!(err, GatewayError::MissingField("signature_key")));
    }
}
