//! Error types for clusterd-store.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from status store operations.
///
/// Every variant is fatal to the dispatcher; the store never tries to repair
/// itself beyond the single lazy schema creation in [`crate::StoreBatch`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened or configured.
    #[error("failed to open status database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The database directory could not be created.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create status table: {0}")]
    Schema(#[source] rusqlite::Error),

    /// Statement preparation failed even after creating the schema.
    #[error("failed to prepare `{sql}`: {source}")]
    Prepare {
        sql: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to begin transaction: {0}")]
    Begin(#[source] rusqlite::Error),

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] rusqlite::Error),

    /// Statement execution or row decoding failed.
    #[error("status store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted status is outside the four allowed values.
    #[error("corrupt status '{status}' stored for {manager_id}:{file_id}")]
    CorruptStatus {
        manager_id: String,
        file_id: String,
        status: String,
    },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
