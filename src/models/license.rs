use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters used in license keys. Omits 0/O and 1/I so keys survive
/// being read aloud or retyped from an email.
const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Lifecycle state of a license.
///
/// Only `Active` validates. Statuses written by other tools that this
/// service does not recognize are kept verbatim in `Unrecognized` so an
/// upsert never rewrites them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LicenseStatus {
    Active,
    Suspended,
    Expired,
    Unrecognized(String),
}

impl LicenseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Suspended => "suspended",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Unrecognized(s) => s,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LicenseStatus::Active)
    }
}

impl From<String> for LicenseStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => LicenseStatus::Active,
            "suspended" => LicenseStatus::Suspended,
            "expired" => LicenseStatus::Expired,
            _ => LicenseStatus::Unrecognized(s),
        }
    }
}

impl From<LicenseStatus> for String {
    fn from(status: LicenseStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    /// Presentable key the customer types into the app; unique
    pub key: String,
    pub customer_id: String,
    pub product_id: String,
    pub product_name: String,
    /// Semantic version the license was issued for (e.g. "1.0.0")
    pub version: String,
    pub status: LicenseStatus,
    /// Amount paid in minor currency units (cents)
    pub price_paid: i64,
    pub currency: String,
    /// Checkout session that produced this license; unique when non-empty
    pub purchase_session_ref: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// Purchase session with empty strings treated as absent.
    pub fn purchase_session(&self) -> Option<&str> {
        Some(self.purchase_session_ref.as_str()).filter(|s| !s.is_empty())
    }
}

/// Generate a license key in the format PREFIX-XXXX-XXXX-XXXX-XXXX.
///
/// Uses the thread-local CSPRNG; 16 symbols over a 32-char alphabet give
/// 80 bits of entropy per key.
pub fn generate_license_key(prefix: &str) -> String {
    let mut rng = rand::thread_rng();

    let mut part = || -> String {
        (0..4)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect()
    };

    format!("{}-{}-{}-{}-{}", prefix, part(), part(), part(), part())
}
