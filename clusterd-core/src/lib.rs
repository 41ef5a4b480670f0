//! clusterd core library: domain types, watch list, settings, errors.
//!
//! - [`types`]: identifiers, [`FileStatus`], watch targets
//! - [`watch_list`]: JSON watch-list parsing and role filtering
//! - [`settings`]: optional YAML daemon settings
//! - [`error`]: [`ConfigError`]

pub mod error;
pub mod settings;
pub mod types;
pub mod watch_list;

pub use error::{ConfigError, ParseStatusError};
pub use settings::{ResponseMode, Settings};
pub use types::{FileId, FileStatus, FileSyncRecord, ManagerId, WatchScope, WatchTarget};
pub use watch_list::WatchList;
