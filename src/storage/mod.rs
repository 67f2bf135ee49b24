//! Customer and license persistence.
//!
//! Three backends implement [`Storage`] with the same contract:
//!
//! - [`MemoryStorage`]: ephemeral, for tests and throwaway runs
//! - [`FileStorage`]: a JSON snapshot on local disk
//! - [`SqliteStorage`]: embedded SQLite, the production backend
//!
//! Lookups return `Ok(None)` (or an empty `Vec`) for absent records; an
//! `Err` always means the backend failed or an invariant was violated.

mod file;
mod memory;
mod sqlite;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::StorageBackend;
use crate::models::{Customer, License};

#[derive(Debug, Error)]
pub enum StorageError {
    /// `save_license` was given a license whose customer does not exist.
    #[error("license references unknown customer {customer_id}")]
    UnknownCustomer { customer_id: String },

    /// A unique field (email, key, external ref, purchase session) is
    /// already taken by a different record.
    #[error("uniqueness violation: {0}")]
    Conflict(String),

    #[error("storage is closed")]
    Closed,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data file {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

pub trait Storage: Send + Sync {
    fn get_customer(&self, id: &str) -> StorageResult<Option<Customer>>;

    fn find_customer_by_email(&self, email: &str) -> StorageResult<Option<Customer>>;

    /// Insert or replace the customer with `customer.id`.
    fn save_customer(&self, customer: &Customer) -> StorageResult<()>;

    fn get_license(&self, id: &str) -> StorageResult<Option<License>>;

    fn find_license_by_key(&self, key: &str) -> StorageResult<Option<License>>;

    /// All licenses owned by a customer, oldest first.
    fn find_licenses_by_customer(&self, customer_id: &str) -> StorageResult<Vec<License>>;

    fn find_license_by_purchase_session(&self, session_ref: &str)
    -> StorageResult<Option<License>>;

    /// Insert or replace the license with `license.id`.
    ///
    /// Fails with [`StorageError::UnknownCustomer`] if `license.customer_id`
    /// does not resolve.
    fn save_license(&self, license: &License) -> StorageResult<()>;

    /// Cheap reachability probe used by the health endpoint.
    fn ping(&self) -> StorageResult<()> {
        self.get_customer("health-check").map(|_| ())
    }

    /// Release backend resources. Safe to call more than once.
    fn close(&self) -> StorageResult<()>;
}

/// Open the configured backend. `path` is ignored for the memory backend.
pub fn open(backend: StorageBackend, path: &Path) -> StorageResult<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::File => Arc::new(FileStorage::open(path)?),
        StorageBackend::Sqlite => Arc::new(SqliteStorage::open(path)?),
    };
    tracing::info!(backend = %backend, path = %path.display(), "Storage opened");
    Ok(storage)
}
