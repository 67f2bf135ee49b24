use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::memory::Tables;
use super::{Storage, StorageError, StorageResult};
use crate::models::{Customer, License};

/// On-disk layout of the data file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Full {
        customers: Vec<Customer>,
        #[serde(default)]
        licenses: Vec<License>,
    },
    /// Older files hold only a bare array of customers.
    Legacy(Vec<Customer>),
}

/// Flat-file storage backed by a single JSON document.
///
/// The whole data set lives in memory. Each write is applied to a copy of
/// the tables, the copy is written to `<path>.tmp` and renamed over the
/// data file, and only then does it replace the in-memory tables. A failed
/// write therefore leaves both memory and disk at the previous state.
pub struct FileStorage {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileStorage {
    /// Open the data file at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let tables = load(&path)?;
        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the tables and persist it before
    /// committing it in memory.
    fn write<F>(&self, change: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Tables) -> StorageResult<()>,
    {
        let mut tables = self.tables.lock();
        let mut next = tables.clone();
        change(&mut next)?;
        persist(&self.path, &next)?;
        *tables = next;
        Ok(())
    }
}

fn load(path: &Path) -> StorageResult<Tables> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(
                path = %path.display(),
                "Data file does not exist, starting with empty storage"
            );
            return Ok(Tables::default());
        }
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let snapshot: Snapshot =
        serde_json::from_str(&contents).map_err(|source| StorageError::Format {
            path: path.to_path_buf(),
            source,
        })?;

    let tables = match snapshot {
        Snapshot::Full {
            customers,
            licenses,
        } => Tables::from_records(customers, licenses),
        Snapshot::Legacy(customers) => {
            tracing::info!(
                path = %path.display(),
                customers = customers.len(),
                "Loaded legacy customer-only data file"
            );
            Tables::from_records(customers, Vec::new())
        }
    };

    Ok(tables)
}

fn persist(path: &Path, tables: &Tables) -> StorageResult<()> {
    let (customers, licenses) = tables.to_records();
    let snapshot = Snapshot::Full {
        customers,
        licenses,
    };
    let contents =
        serde_json::to_vec_pretty(&snapshot).map_err(|source| StorageError::Format {
            path: path.to_path_buf(),
            source,
        })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).map_err(|source| StorageError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Storage for FileStorage {
    fn get_customer(&self, id: &str) -> StorageResult<Option<Customer>> {
        Ok(self.tables.lock().get_customer(id))
    }

    fn find_customer_by_email(&self, email: &str) -> StorageResult<Option<Customer>> {
        Ok(self.tables.lock().find_customer_by_email(email))
    }

    fn save_customer(&self, customer: &Customer) -> StorageResult<()> {
        self.write(|tables| tables.put_customer(customer))
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
        self.write(|tables| tables.put_license(license))
    }

    // Every write is already on disk.
    fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .finish()
    }
}
