use std::collections::HashMap;

use parking_lot::Mutex;

use super::{Storage, StorageError, StorageResult};
use crate::models::{Customer, License};

/// Customer and license tables with the uniqueness and referential checks
/// that SQLite gets from its schema. Shared by the memory and file backends.
#[derive(Debug, Default, Clone)]
pub(super) struct Tables {
    customers: HashMap<String, Customer>,
    licenses: HashMap<String, License>,
}

impl Tables {
    pub(super) fn from_records(customers: Vec<Customer>, licenses: Vec<License>) -> Self {
        Self {
            customers: customers.into_iter().map(|c| (c.id.clone(), c)).collect(),
            licenses: licenses.into_iter().map(|l| (l.id.clone(), l)).collect(),
        }
    }

    /// Records ordered by creation time, for stable snapshots.
    pub(super) fn to_records(&self) -> (Vec<Customer>, Vec<License>) {
        let mut customers: Vec<Customer> = self.customers.values().cloned().collect();
        customers.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        let mut licenses: Vec<License> = self.licenses.values().cloned().collect();
        licenses.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        (customers, licenses)
    }

    pub(super) fn get_customer(&self, id: &str) -> Option<Customer> {
        self.customers.get(id).cloned()
    }

    pub(super) fn find_customer_by_email(&self, email: &str) -> Option<Customer> {
        self.customers.values().find(|c| c.email == email).cloned()
    }

    pub(super) fn put_customer(&mut self, customer: &Customer) -> StorageResult<()> {
        let mut others = self.customers.values().filter(|c| c.id != customer.id);

        if others.clone().any(|c| c.email == customer.email) {
            return Err(StorageError::Conflict(format!(
                "customer email {} already in use",
                customer.email
            )));
        }
        if let Some(external) = customer.external_ref()
            && others.any(|c| c.external_ref() == Some(external))
        {
            return Err(StorageError::Conflict(format!(
                "external customer ref {} already in use",
                external
            )));
        }

        self.customers.insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    pub(super) fn get_license(&self, id: &str) -> Option<License> {
        self.licenses.get(id).cloned()
    }

    pub(super) fn find_license_by_key(&self, key: &str) -> Option<License> {
        self.licenses.values().find(|l| l.key == key).cloned()
    }

    pub(super) fn find_licenses_by_customer(&self, customer_id: &str) -> Vec<License> {
        let mut licenses: Vec<License> = self
            .licenses
            .values()
            .filter(|l| l.customer_id == customer_id)
            .cloned()
            .collect();
        licenses.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        licenses
    }

    pub(super) fn find_license_by_purchase_session(&self, session_ref: &str) -> Option<License> {
        if session_ref.is_empty() {
            return None;
        }
        self.licenses
            .values()
            .find(|l| l.purchase_session_ref == session_ref)
            .cloned()
    }

    pub(super) fn put_license(&mut self, license: &License) -> StorageResult<()> {
        if !self.customers.contains_key(&license.customer_id) {
            return Err(StorageError::UnknownCustomer {
                customer_id: license.customer_id.clone(),
            });
        }

        let mut others = self.licenses.values().filter(|l| l.id != license.id);

        if others.clone().any(|l| l.key == license.key) {
            return Err(StorageError::Conflict(format!(
                "license key {} already in use",
                license.key
            )));
        }
        if let Some(session) = license.purchase_session()
            && others.any(|l| l.purchase_session() == Some(session))
        {
            return Err(StorageError::Conflict(format!(
                "purchase session {} already has a license",
                session
            )));
        }

        self.licenses.insert(license.id.clone(), license.clone());
        Ok(())
    }
}

/// In-process storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_customer(&self, id: &str) -> StorageResult<Option<Customer>> {
        Ok(self.tables.lock().get_customer(id))
    }

    fn find_customer_by_email(&self, email: &str) -> StorageResult<Option<Customer>> {
        Ok(self.tables.lock().find_customer_by_email(email))
    }

    fn save_customer(&self, customer: &Customer) -> StorageResult<()> {
        self.tables.lock().put_customer(customer)
    }

    fn get_license(&self, id: &str) -> StorageResult<Option<License>> {
        Ok(self.tables.lock().get_license(id))
    }

    fn find_license_by_key(&self, key: &str) -> StorageResult<Option<License>> {
        Ok(self.tables.lock().find_license_by_key(key))
    }

    fn find_licenses_by_customer(&self, customer_id: &str) -> StorageResult<Vec<License>> {
        Ok(self.tables.lock().find_licenses_by_customer(customer_id))
    }

    fn find_license_by_purchase_session(
        &self,
        session_ref: &str,
    ) -> StorageResult<Option<License>> {
        Ok(self.tables.lock().find_license_by_purchase_session(session_ref))
    }

    fn save_license(&self, license: &License) -> StorageResult<()> {
        self.tables.lock().put_license(license)
    }

    fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
