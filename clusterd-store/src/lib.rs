//! # clusterd-store
//!
//! Transactional per-manager file-sync status storage.
//!
//! Open a [`StatusStore`], then group reads and writes into a [`StoreBatch`]
//! via [`StatusStore::begin`] or [`StatusStore::with_batch`].

pub mod error;
pub mod status_store;

pub use error::StoreError;
pub use status_store::{StatusStore, StoreBatch, TABLE_NAME};
