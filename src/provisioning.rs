//! Turning a completed purchase into a customer and a license.
//!
//! Provisioning is idempotent per purchase session: replaying the same
//! checkout returns the license issued the first time and sends no second
//! email. Customers are found or created by normalized email.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::email::Notifier;
use crate::models::{Customer, License, LicenseStatus, generate_license_key, normalize_email};
use crate::storage::{Storage, StorageError};

/// Attempts at saving a new license before giving up on key collisions.
const MAX_KEY_ATTEMPTS: usize = 3;

/// Product fields carried in the checkout metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductMetadata {
    pub product_id: String,
    pub license_version: String,
    pub product_name: Option<String>,
}

/// A completed purchase, independent of the payment processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseEvent {
    /// Processor checkout session id; the idempotency key when non-empty
    pub session_ref: String,
    pub email: String,
    pub customer_name: Option<String>,
    pub country: Option<String>,
    pub external_customer_ref: Option<String>,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub product: ProductMetadata,
}

#[derive(Debug, Clone)]
pub struct Provisioned {
    pub customer: Customer,
    pub license: License,
    /// False when the purchase session had already been provisioned
    pub created: bool,
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("purchase event has no customer email")]
    MissingEmail,

    #[error("failed to resolve customer {email}: {source}")]
    Customer {
        email: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to save license for customer {customer_id}: {source}")]
    License {
        customer_id: String,
        #[source]
        source: StorageError,
    },

    #[error("could not generate a unique license key after {attempts} attempts")]
    KeyCollisions { attempts: usize },
}

pub struct ProvisioningService {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    key_prefix: String,
}

impl ProvisioningService {
    pub fn new(
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            notifier,
            key_prefix: key_prefix.into(),
        }
    }

    pub async fn provision(&self, event: &PurchaseEvent) -> Result<Provisioned, ProvisioningError> {
        let customer = self.find_or_create_customer(event)?;

        if let Some(existing) = self.license_for_session(&event.session_ref, &customer)? {
            tracing::info!(
                session_id = %event.session_ref,
                license_id = %existing.id,
                customer_id = %customer.id,
                "Purchase session already provisioned, returning existing license"
            );
            return Ok(Provisioned {
                customer,
                license: existing,
                created: false,
            });
        }

        let (license, created) = self.create_license(&customer, event)?;
        if !created {
            return Ok(Provisioned {
                customer,
                license,
                created,
            });
        }

        tracing::info!(
            license_id = %license.id,
            customer_id = %customer.id,
            product_id = %license.product_id,
            version = %license.version,
            session_id = %event.session_ref,
            "License issued"
        );

        // The license is already stored; a failed email must not undo it.
        if let Err(e) = self.notifier.license_issued(&customer, &license).await {
            tracing::error!(
                error = %e,
                customer_id = %customer.id,
                license_id = %license.id,
                session_id = %event.session_ref,
                "Failed to send license email"
            );
        }

        Ok(Provisioned {
            customer,
            license,
            created: true,
        })
    }

    fn find_or_create_customer(&self, event: &PurchaseEvent) -> Result<Customer, ProvisioningError> {
        let email = normalize_email(&event.email);
        if email.is_empty() {
            return Err(ProvisioningError::MissingEmail);
        }
        let customer_err = |source| ProvisioningError::Customer {
            email: email.clone(),
            source,
        };

        if let Some(existing) = self.storage.find_customer_by_email(&email).map_err(customer_err)? {
            tracing::debug!(customer_id = %existing.id, "Existing customer found");
            return Ok(existing);
        }

        let now = Utc::now().timestamp();
        let mut customer = Customer {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            name: non_empty(&event.customer_name),
            country: non_empty(&event.country),
            external_customer_ref: non_empty(&event.external_customer_ref),
            created_at: now,
            updated_at: now,
        };

        match self.storage.save_customer(&customer) {
            Ok(()) => {}
            Err(StorageError::Conflict(reason)) => {
                // A concurrent delivery may have created the same customer first.
                if let Some(existing) =
                    self.storage.find_customer_by_email(&email).map_err(customer_err)?
                {
                    return Ok(existing);
                }
                // Otherwise the processor's customer ref already belongs to
                // a customer under another email.
                tracing::warn!(
                    reason = %reason,
                    external_customer_ref = ?customer.external_customer_ref,
                    "External customer ref already linked, creating customer without it"
                );
                customer.external_customer_ref = None;
                self.storage.save_customer(&customer).map_err(customer_err)?;
            }
            Err(e) => return Err(customer_err(e)),
        }

        tracing::info!(customer_id = %customer.id, "New customer created");
        Ok(customer)
    }

    fn license_for_session(
        &self,
        session_ref: &str,
        customer: &Customer,
    ) -> Result<Option<License>, ProvisioningError> {
        if session_ref.is_empty() {
            return Ok(None);
        }
        self.storage
            .find_license_by_purchase_session(session_ref)
            .map_err(|source| ProvisioningError::License {
                customer_id: customer.id.clone(),
                source,
            })
    }

    /// Save a fresh license, regenerating the key on collision. Returns the
    /// existing license instead if a concurrent delivery won the session.
    fn create_license(
        &self,
        customer: &Customer,
        event: &PurchaseEvent,
    ) -> Result<(License, bool), ProvisioningError> {
        let product = &event.product;
        if product.license_version.is_empty() {
            tracing::warn!(
                session_id = %event.session_ref,
                product_id = %product.product_id,
                "Purchase metadata has no license_version"
            );
        }
        let product_name = product
            .product_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| product.product_id.clone());

        let now = Utc::now().timestamp();
        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let license = License {
                id: Uuid::new_v4().to_string(),
                key: generate_license_key(&self.key_prefix),
                customer_id: customer.id.clone(),
                product_id: product.product_id.clone(),
                product_name: product_name.clone(),
                version: product.license_version.clone(),
                status: LicenseStatus::Active,
                price_paid: event.amount,
                currency: event.currency.clone(),
                purchase_session_ref: event.session_ref.clone(),
                created_at: now,
                updated_at: now,
            };

            match self.storage.save_license(&license) {
                Ok(()) => return Ok((license, true)),
                Err(StorageError::Conflict(reason)) => {
                    if let Some(existing) = self.license_for_session(&event.session_ref, customer)? {
                        return Ok((existing, false));
                    }
                    tracing::warn!(attempt, reason = %reason, "License key collision, regenerating");
                }
                Err(source) => {
                    return Err(ProvisioningError::License {
                        customer_id: customer.id.clone(),
                        source,
                    });
                }
            }
        }

        Err(ProvisioningError::KeyCollisions {
            attempts: MAX_KEY_ATTEMPTS,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
