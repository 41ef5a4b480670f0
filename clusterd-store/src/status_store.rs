//! SQLite-backed file-sync status table.
//!
//! One row per `(id_manager, id_file)`. The table is created lazily: the first
//! statement that fails to prepare triggers a single `CREATE TABLE IF NOT
//! EXISTS` and one retry, so opening an empty database never fails.
//!
//! All reads and writes go through a [`StoreBatch`], which wraps one SQLite
//! transaction. Dropping a batch without [`StoreBatch::commit`] rolls it back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, CachedStatement, Connection, Transaction};

use clusterd_core::{FileId, FileStatus, FileSyncRecord, ManagerId};

use crate::error::{io_err, StoreError};

pub const TABLE_NAME: &str = "manager_file_status";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS manager_file_status (\
     id_manager TEXT, \
     id_file    TEXT, \
     status     TEXT NOT NULL CHECK (status IN ('synchronized', 'pending', 'failed', 'invalid')), \
     PRIMARY KEY (id_manager, id_file))";

const SQL_SET_STATUS: &str =
    "UPDATE manager_file_status SET status = ?1 WHERE id_manager = ?2 AND id_file = ?3";
const SQL_SET_ALL_PENDING: &str =
    "UPDATE manager_file_status SET status = 'pending' WHERE id_file = ?1";
const SQL_UPSERT: &str = "INSERT INTO manager_file_status (id_manager, id_file, status) \
     VALUES (?1, ?2, 'pending') \
     ON CONFLICT(id_manager, id_file) DO UPDATE SET status = 'pending'";
const SQL_QUERY: &str = "SELECT id_file, status FROM manager_file_status \
     WHERE id_manager = ?1 LIMIT ?2 OFFSET ?3";
const SQL_COUNT: &str = "SELECT COUNT(*) FROM manager_file_status WHERE id_manager = ?1";

/// Owner of the status database connection.
pub struct StatusStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl StatusStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let open_err = |source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        let conn = Connection::open(path).map_err(open_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
        tracing::debug!(path = %path.display(), "opened status database");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Ok(Self { conn, path: None })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Idempotently create the status table.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        ensure_schema(&self.conn)
    }

    /// Open a transaction. Everything done through the returned batch is
    /// applied atomically on [`StoreBatch::commit`].
    pub fn begin(&mut self) -> Result<StoreBatch<'_>, StoreError> {
        let tx = self.conn.transaction().map_err(StoreError::Begin)?;
        Ok(StoreBatch { tx })
    }

    /// Run `f` inside one transaction and commit it.
    pub fn with_batch<T>(
        &mut self,
        f: impl FnOnce(&StoreBatch<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let batch = self.begin()?;
        let value = f(&batch)?;
        batch.commit()?;
        Ok(value)
    }
}

/// One open transaction against the status table.
pub struct StoreBatch<'conn> {
    tx: Transaction<'conn>,
}

impl StoreBatch<'_> {
    /// Insert `(manager_id, file_id)` as pending; an existing row is reset to
    /// pending instead. Returns the number of rows touched.
    pub fn upsert(&self, manager_id: &ManagerId, file_id: &FileId) -> Result<usize, StoreError> {
        let mut stmt = self.prepare(SQL_UPSERT)?;
        Ok(stmt.execute(params![manager_id.as_str(), file_id.as_str()])?)
    }

    /// Set the status of exactly one row. A missing row is not an error.
    pub fn set_status(
        &self,
        status: FileStatus,
        manager_id: &ManagerId,
        file_id: &FileId,
    ) -> Result<usize, StoreError> {
        let mut stmt = self.prepare(SQL_SET_STATUS)?;
        Ok(stmt.execute(params![
            status.as_str(),
            manager_id.as_str(),
            file_id.as_str()
        ])?)
    }

    /// Mark `file_id` pending on every manager.
    pub fn set_all_pending_by_file(&self, file_id: &FileId) -> Result<usize, StoreError> {
        let mut stmt = self.prepare(SQL_SET_ALL_PENDING)?;
        Ok(stmt.execute(params![file_id.as_str()])?)
    }

    /// Up to `limit` rows for `manager_id`, skipping `offset`, in storage order.
    pub fn query(
        &self,
        manager_id: &ManagerId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FileSyncRecord>, StoreError> {
        let mut stmt = self.prepare(SQL_QUERY)?;
        let rows = stmt.query_map(
            params![manager_id.as_str(), i64::from(limit), i64::from(offset)],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (file_id, status) = row?;
            let status = status
                .parse::<FileStatus>()
                .map_err(|_| StoreError::CorruptStatus {
                    manager_id: manager_id.to_string(),
                    file_id: file_id.clone(),
                    status,
                })?;
            records.push(FileSyncRecord {
                manager_id: manager_id.clone(),
                file_id: FileId::from(file_id),
                status,
            });
        }
        Ok(records)
    }

    /// Number of rows stored for `manager_id`.
    pub fn count(&self, manager_id: &ManagerId) -> Result<u64, StoreError> {
        let mut stmt = self.prepare(SQL_COUNT)?;
        let count: i64 = stmt.query_row(params![manager_id.as_str()], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(StoreError::Commit)
    }

    fn prepare(&self, sql: &'static str) -> Result<CachedStatement<'_>, StoreError> {
        match self.tx.prepare_cached(sql) {
            Ok(stmt) => Ok(stmt),
            Err(err) => {
                tracing::debug!(error = %err, "prepare failed; creating status table");
                ensure_schema(&self.tx)?;
                self.tx
                    .prepare_cached(sql)
                    .map_err(|source| StoreError::Prepare { sql, source })
            }
        }
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(CREATE_TABLE).map_err(StoreError::Schema)
}
