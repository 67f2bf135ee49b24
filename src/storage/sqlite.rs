use std::path::Path;

use parking_lot::RwLock;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, ToSql, ffi, params};

use super::{Storage, StorageError, StorageResult};
use crate::models::{Customer, License};

pub type DbPool = Pool<SqliteConnectionManager>;
type DbConn = PooledConnection<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT,
    country TEXT,
    external_customer_ref TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_customers_external_ref
    ON customers(external_customer_ref)
    WHERE external_customer_ref IS NOT NULL AND external_customer_ref <> '';

CREATE TABLE IF NOT EXISTS licenses (
    id TEXT PRIMARY KEY,
    license_key TEXT NOT NULL UNIQUE,
    customer_id TEXT NOT NULL REFERENCES customers(id),
    product_id TEXT NOT NULL,
    product_name TEXT NOT NULL,
    version TEXT NOT NULL,
    status TEXT NOT NULL,
    price_paid INTEGER NOT NULL,
    currency TEXT NOT NULL,
    purchase_session_ref TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_licenses_customer ON licenses(customer_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_licenses_purchase_session
    ON licenses(purchase_session_ref)
    WHERE purchase_session_ref <> '';
";

const CUSTOMER_COLS: &str =
    "id, email, name, country, external_customer_ref, created_at, updated_at";

const LICENSE_COLS: &str = "id, license_key, customer_id, product_id, product_name, version, \
     status, price_paid, currency, purchase_session_ref, created_at, updated_at";

trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            country: row.get(3)?,
            external_customer_ref: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            key: row.get(1)?,
            customer_id: row.get(2)?,
            product_id: row.get(3)?,
            product_name: row.get(4)?,
            version: row.get(5)?,
            status: row.get::<_, String>(6)?.into(),
            price_paid: row.get(7)?,
            currency: row.get(8)?,
            purchase_session_ref: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> StorageResult<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> StorageResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, T::from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Translate constraint failures into the storage contract's errors.
fn map_write_error(err: rusqlite::Error, customer_id: Option<&str>) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err
        && failure.code == ErrorCode::ConstraintViolation
    {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                if let Some(customer_id) = customer_id {
                    return StorageError::UnknownCustomer {
                        customer_id: customer_id.to_string(),
                    };
                }
            }
            ffi::SQLITE_CONSTRAINT_UNIQUE => {
                return StorageError::Conflict(
                    message
                        .clone()
                        .unwrap_or_else(|| "unique constraint failed".into()),
                );
            }
            _ => {}
        }
    }
    StorageError::Database(err)
}

/// SQLite storage behind an r2d2 pool. Foreign keys are switched on for
/// every pooled connection.
pub struct SqliteStorage {
    pool: RwLock<Option<DbPool>>,
}

impl SqliteStorage {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(init_connection);
        let pool = Pool::builder().max_size(8).build(manager)?;
        Self::from_pool(pool)
    }

    /// A private in-memory database. Pinned to a single connection, since
    /// each SQLite in-memory connection is its own database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: DbPool) -> StorageResult<Self> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self {
            pool: RwLock::new(Some(pool)),
        })
    }

    fn conn(&self) -> StorageResult<DbConn> {
        let pool = self.pool.read();
        let pool = pool.as_ref().ok_or(StorageError::Closed)?;
        Ok(pool.get()?)
    }
}

fn init_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
}

impl Storage for SqliteStorage {
    fn get_customer(&self, id: &str) -> StorageResult<Option<Customer>> {
        query_one(
            &*self.conn()?,
            &format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLS),
            &[&id],
        )
    }

    fn find_customer_by_email(&self, email: &str) -> StorageResult<Option<Customer>> {
        query_one(
            &*self.conn()?,
            &format!("SELECT {} FROM customers WHERE email = ?1", CUSTOMER_COLS),
            &[&email],
        )
    }

    fn save_customer(&self, customer: &Customer) -> StorageResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO customers (id, email, name, country, external_customer_ref, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    email = excluded.email,
                    name = excluded.name,
                    country = excluded.country,
                    external_customer_ref = excluded.external_customer_ref,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                params![
                    customer.id,
                    customer.email,
                    customer.name,
                    customer.country,
                    customer.external_customer_ref,
                    customer.created_at,
                    customer.updated_at,
                ],
            )
            .map_err(|e| map_write_error(e, None))?;
        Ok(())
    }

    fn get_license(&self, id: &str) -> StorageResult<Option<License>> {
        query_one(
            &*self.conn()?,
            &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
            &[&id],
        )
    }

    fn find_license_by_key(&self, key: &str) -> StorageResult<Option<License>> {
        query_one(
            &*self.conn()?,
            &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
            &[&key],
        )
    }

    fn find_licenses_by_customer(&self, customer_id: &str) -> StorageResult<Vec<License>> {
        query_all(
            &*self.conn()?,
            &format!(
                "SELECT {} FROM licenses WHERE customer_id = ?1 ORDER BY created_at ASC, id ASC",
                LICENSE_COLS
            ),
            &[&customer_id],
        )
    }

    fn find_license_by_purchase_session(
        &self,
        session_ref: &str,
    ) -> StorageResult<Option<License>> {
        if session_ref.is_empty() {
            return Ok(None);
        }
        query_one(
            &*self.conn()?,
            &format!(
                "SELECT {} FROM licenses WHERE purchase_session_ref = ?1",
                LICENSE_COLS
            ),
            &[&session_ref],
        )
    }

    fn save_license(&self, license: &License) -> StorageResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO licenses (id, license_key, customer_id, product_id, product_name, version,
                                       status, price_paid, currency, purchase_session_ref, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    license_key = excluded.license_key,
                    customer_id = excluded.customer_id,
                    product_id = excluded.product_id,
                    product_name = excluded.product_name,
                    version = excluded.version,
                    status = excluded.status,
                    price_paid = excluded.price_paid,
                    currency = excluded.currency,
                    purchase_session_ref = excluded.purchase_session_ref,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                params![
                    license.id,
                    license.key,
                    license.customer_id,
                    license.product_id,
                    license.product_name,
                    license.version,
                    license.status.as_str(),
                    license.price_paid,
                    license.currency,
                    license.purchase_session_ref,
                    license.created_at,
                    license.updated_at,
                ],
            )
            .map_err(|e| map_write_error(e, Some(&license.customer_id)))?;
        Ok(())
    }

    fn ping(&self) -> StorageResult<()> {
        self.conn()?
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.pool.write().take().is_some() {
            tracing::info!("SQLite storage closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("open", &self.pool.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LicenseStatus;

    fn customer(id: &str, email: &str) -> Customer {
        Customer {
            id: id.into(),
            email: email.into(),
            name: None,
            country: None,
            external_customer_ref: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn license(id: &str, key: &str, customer_id: &str) -> License {
        License {
            id: id.into(),
            key: key.into(),
            customer_id: customer_id.into(),
            product_id: "app".into(),
            product_name: "App".into(),
            version: "1.0.0".into(),
            status: LicenseStatus::Active,
            price_paid: 1000,
            currency: "usd".into(),
            purchase_session_ref: String::new(),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_foreign_key_violation_maps_to_unknown_customer() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let err = storage
            .save_license(&license("l1", "LIC-A", "ghost"))
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownCustomer { ref customer_id } if customer_id == "ghost"));
    }

    #[test]
    fn test_duplicate_email_maps_to_conflict() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.save_customer(&customer("c1", "a@example.com")).unwrap();
        let err = storage
            .save_customer(&customer("c2", "a@example.com"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        // The first row is untouched.
        assert!(storage.get_customer("c1").unwrap().is_some());
        assert!(storage.get_customer("c2").unwrap().is_none());
    }

    #[test]
    fn test_unrecognized_status_survives_round_trip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.save_customer(&customer("c1", "a@example.com")).unwrap();
        let mut l = license("l1", "LIC-A", "c1");
        l.status = LicenseStatus::Unrecognized("revoked".into());
        storage.save_license(&l).unwrap();

        let loaded = storage.get_license("l1").unwrap().unwrap();
        assert_eq!(loaded.status.as_str(), "revoked");
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_later_calls() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.close().unwrap();
        storage.close().unwrap();
        assert!(matches!(
            storage.get_customer("c1").unwrap_err(),
            StorageError::Closed
        ));
        assert!(storage.ping().is_err());
    }
}
