use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    /// Normalized purchase email, unique across customers
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Payment processor's customer id (e.g. Stripe `cus_...`), unique when present
    #[serde(default)]
    pub external_customer_ref: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Customer {
    /// External reference with empty strings treated as absent.
    pub fn external_ref(&self) -> Option<&str> {
        self.external_customer_ref
            .as_deref()
            .filter(|r| !r.is_empty())
    }

    /// First word of the display name, for email greetings.
    pub fn first_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
    }
}

/// Normalize an email address for storage and lookup.
///
/// Trims, applies NFC and lowercases so the same mailbox typed two ways
/// resolves to one customer.
pub fn normalize_email(email: &str) -> String {
    email.trim().nfc().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(name: Option<&str>, external: Option<&str>) -> Customer {
        Customer {
            id: "c1".into(),
            email: "a@example.com".into(),
            name: name.map(String::from),
            country: None,
            external_customer_ref: external.map(String::from),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  New@Example.COM "), "new@example.com");
        assert_eq!(normalize_email("user+tag@example.com"), "user+tag@example.com");
    }

    #[test]
    fn test_empty_external_ref_is_absent() {
        assert_eq!(customer(None, Some("")).external_ref(), None);
        assert_eq!(customer(None, Some("cus_123")).external_ref(), Some("cus_123"));
        assert_eq!(customer(None, None).external_ref(), None);
    }

    #[test]
    fn test_first_name() {
        assert_eq!(customer(Some("Ada Lovelace"), None).first_name(), Some("Ada"));
        assert_eq!(customer(Some("   "), None).first_name(), None);
        assert_eq!(customer(None, None).first_name(), None);
    }
}
