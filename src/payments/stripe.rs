use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::provisioning::{ProductMetadata, PurchaseEvent};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signatures")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("timestamp outside tolerance ({age}s)")]
    TimestampOutsideTolerance { age: u64 },

    #[error("no signature matches the payload")]
    Mismatch,

    #[error("webhook secret rejected by HMAC-SHA256")]
    InvalidSecret,
}

/// Verifies the `Stripe-Signature` header against the endpoint secret.
///
/// The header looks like `t=1492774577,v1=5257a8...,v1=...`; each `v1` is a
/// hex HMAC-SHA256 of `"{t}.{raw body}"`. Several `v1` entries appear while
/// a secret is being rolled, and any one of them may match.
#[derive(Clone)]
pub struct StripeWebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
}

impl StripeWebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance_secs: SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(SignatureError::MalformedHeader)?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| SignatureError::MalformedHeader)?,
                    )
                }
                // Undecodable entries can never match; skip them.
                "v1" => signatures.extend(hex::decode(value).ok()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }

        let age = now.abs_diff(timestamp);
        if age > self.tolerance_secs {
            return Err(SignatureError::TimestampOutsideTolerance { age });
        }

        let expected = self.mac(payload, timestamp)?;
        if signatures
            .iter()
            .any(|sig| bool::from(expected.as_slice().ct_eq(sig)))
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    fn mac(&self, payload: &[u8], timestamp: i64) -> Result<Vec<u8>, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Build a `Stripe-Signature` header value for `payload`, as Stripe would.
pub fn signature_header(
    secret: &str,
    payload: &[u8],
    timestamp: i64,
) -> Result<String, SignatureError> {
    let sig = StripeWebhookVerifier::new(secret).mac(payload, timestamp)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(sig)))
}

impl std::fmt::Debug for StripeWebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeWebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// `customer` is a bare id unless the object was expanded.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StripeCustomerField {
    Id(String),
    Object { id: String },
}

impl StripeCustomerField {
    pub fn id(&self) -> &str {
        match self {
            StripeCustomerField::Id(id) => id,
            StripeCustomerField::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeAddress {
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<StripeAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<StripeCustomerField>,
    #[serde(default)]
    pub customer_details: Option<StripeCustomerDetails>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl StripeCheckoutSession {
    /// Unpaid sessions (e.g. delayed payment methods) must not be provisioned.
    /// A missing status is treated as paid.
    pub fn is_paid(&self) -> bool {
        match self.payment_status.as_deref() {
            None => true,
            Some(status) => status == "paid" || status == "no_payment_required",
        }
    }

    /// Purchaser email, preferring what the customer typed at checkout.
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .filter(|e| !e.trim().is_empty())
            .or_else(|| {
                self.customer_email
                    .as_deref()
                    .filter(|e| !e.trim().is_empty())
            })
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }

    pub fn to_purchase_event(&self) -> PurchaseEvent {
        let details = self.customer_details.clone().unwrap_or_default();
        PurchaseEvent {
            session_ref: self.id.clone(),
            email: self.email().unwrap_or_default().to_string(),
            customer_name: details.name,
            country: details.address.and_then(|a| a.country),
            external_customer_ref: self.customer.as_ref().map(|c| c.id().to_string()),
            amount: self.amount_total.unwrap_or_default(),
            currency: self.currency.clone().unwrap_or_default(),
            product: ProductMetadata {
                product_id: self.metadata("product_id").unwrap_or_default().to_string(),
                license_version: self
                    .metadata("license_version")
                    .unwrap_or_default()
                    .to_string(),
                product_name: self.metadata("product_name").map(String::from),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_valid_signature_passes() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, payload, NOW).unwrap();
        assert_eq!(
            StripeWebhookVerifier::new(SECRET).verify_at(payload, &header, NOW + 10),
            Ok(())
        );
    }

    #[test]
    fn test_wrong_secret_fails() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header("wrong_secret", payload, NOW).unwrap();
        assert_eq!(
            StripeWebhookVerifier::new(SECRET).verify_at(payload, &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_modified_payload_fails() {
        let header = signature_header(SECRET, br#"{"amount":100}"#, NOW).unwrap();
        assert_eq!(
            StripeWebhookVerifier::new(SECRET).verify_at(br#"{"amount":1}"#, &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_old_timestamp_fails() {
        let payload = b"{}";
        let header = signature_header(SECRET, payload, NOW - 600).unwrap();
        assert_eq!(
            StripeWebhookVerifier::new(SECRET).verify_at(payload, &header, NOW),
            Err(SignatureError::TimestampOutsideTolerance { age: 600 })
        );
    }

    #[test]
    fn test_extreme_timestamps_are_rejected() {
        let v = StripeWebhookVerifier::new(SECRET);
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1={}", t, "00".repeat(32));
            assert!(matches!(
                v.verify_at(b"{}", &header, NOW),
                Err(SignatureError::TimestampOutsideTolerance { .. })
            ));
        }
        assert!(matches!(
            v.verify_at(b"{}", "t=0,v1=00", i64::MIN),
            Err(SignatureError::TimestampOutsideTolerance { .. })
        ));
    }

    #[test]
    fn test_any_of_several_signatures_may_match() {
        let payload = b"{}";
        let good = signature_header(SECRET, payload, NOW).unwrap();
        let good_sig = good.split_once(",v1=").unwrap().1;
        let header = format!("t={},v1={},v1={},v0=legacy", NOW, "00".repeat(32), good_sig);
        assert_eq!(
            StripeWebhookVerifier::new(SECRET).verify_at(payload, &header, NOW),
            Ok(())
        );
    }

    #[test]
    fn test_malformed_headers() {
        let v = StripeWebhookVerifier::new(SECRET);
        assert_eq!(
            v.verify_at(b"{}", "v1=abcd", NOW),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            v.verify_at(b"{}", "t=1234567890", NOW),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            v.verify_at(b"{}", "garbage", NOW),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            v.verify_at(b"{}", "t=abc,v1=00", NOW),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn test_checkout_session_to_purchase_event() {
        let session: StripeCheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_test_1",
            "customer": "cus_42",
            "customer_details": {
                "email": "Buyer@Example.com",
                "name": "Ada Lovelace",
                "address": { "country": "GB" }
            },
            "customer_email": null,
            "amount_total": 1999,
            "currency": "gbp",
            "payment_status": "paid",
            "metadata": {
                "product_id": "p1",
                "license_version": "1.0.0",
                "product_name": "App Pro"
            }
        }))
        .unwrap();

        assert!(session.is_paid());
        let event = session.to_purchase_event();
        assert_eq!(event.session_ref, "cs_test_1");
        assert_eq!(event.email, "Buyer@Example.com");
        assert_eq!(event.customer_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(event.country.as_deref(), Some("GB"));
        assert_eq!(event.external_customer_ref.as_deref(), Some("cus_42"));
        assert_eq!(event.amount, 1999);
        assert_eq!(event.product.product_id, "p1");
        assert_eq!(event.product.license_version, "1.0.0");
        assert_eq!(event.product.product_name.as_deref(), Some("App Pro"));
    }

    #[test]
    fn test_email_falls_back_to_customer_email() {
        let session: StripeCheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_test_2",
            "customer": { "id": "cus_7", "object": "customer" },
            "customer_details": { "email": "" },
            "customer_email": "fallback@example.com",
            "payment_status": "unpaid",
            "metadata": null
        }))
        .unwrap();

        assert!(!session.is_paid());
        assert_eq!(session.email(), Some("fallback@example.com"));
        let event = session.to_purchase_event();
        assert_eq!(event.external_customer_ref.as_deref(), Some("cus_7"));
        assert_eq!(event.product, ProductMetadata::default());
    }
}
