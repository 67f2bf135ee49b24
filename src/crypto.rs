//! Signing of validation verdicts.
//!
//! Clients recompute `HMAC-SHA256(secret, "{valid}|{message}|{timestamp}")`
//! and compare it with the base64 `signature` field to detect tampering
//! with the response in transit.

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Used when no signing secret is configured. Refused in production.
pub const INSECURE_DEFAULT_SECRET: &str = "license-cloud-insecure-default-hmac-secret";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("signing secret rejected by HMAC-SHA256")]
    InvalidKey,
}

#[derive(Clone)]
pub struct ResponseSigner {
    secret: Vec<u8>,
    insecure_default: bool,
}

impl ResponseSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            insecure_default: false,
        }
    }

    /// Build a signer from the configured secret, falling back to the
    /// built-in default (with a warning) when none is set.
    pub fn from_config(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => Self::new(secret),
            None => {
                tracing::warn!(
                    "HMAC_SECRET is not set; validation responses are signed with the insecure default secret"
                );
                Self {
                    secret: INSECURE_DEFAULT_SECRET.as_bytes().to_vec(),
                    insecure_default: true,
                }
            }
        }
    }

    pub fn is_insecure_default(&self) -> bool {
        self.insecure_default
    }

    fn mac(&self, valid: bool, message: &str, timestamp: i64) -> Result<HmacSha256, SigningError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SigningError::InvalidKey)?;
        mac.update(format!("{}|{}|{}", valid, message, timestamp).as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, valid: bool, message: &str, timestamp: i64) -> Result<String, SigningError> {
        let mac = self.mac(valid, message, timestamp)?;
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Check a base64 signature in constant time.
    pub fn verify(&self, valid: bool, message: &str, timestamp: i64, signature: &str) -> bool {
        let Ok(provided) = STANDARD.decode(signature) else {
            return false;
        };
        let Ok(mac) = self.mac(valid, message, timestamp) else {
            return false;
        };
        let expected = mac.finalize().into_bytes();
        expected.as_slice().ct_eq(&provided).into()
    }
}

impl std::fmt::Debug for ResponseSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSigner")
            .field("secret", &"<redacted>")
            .field("insecure_default", &self.insecure_default)
            .finish()
    }
}
