//! Watch-list loading.
//!
//! The watch list is a JSON object keyed by root-relative path:
//!
//! ```text
//! {
//!   "/etc/":            { "source": "master", "files": ["client.keys"] },
//!   "/etc/shared/":     { "source": "all" },
//!   "/queue/agent-info/": { "source": "client" }
//! }
//! ```
//!
//! Only the `source` scope is consumed here; every other field belongs to the
//! synchronization agent. Entries keep file order.

use std::path::Path;

use serde_json::Value;

use crate::error::{io_err, ConfigError};
use crate::types::{WatchScope, WatchTarget};

/// Parsed watch list, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    pub entries: Vec<WatchTarget>,
}

impl WatchList {
    /// Entries a node running as `node_role` must watch.
    pub fn active_targets(&self, node_role: &str) -> Vec<&WatchTarget> {
        self.entries
            .iter()
            .filter(|target| target.is_active_for(node_role))
            .collect()
    }
}

/// Load and parse the watch list at `path`.
///
/// Returns `ConfigError::Io` if the file cannot be read and
/// `ConfigError::WatchList` (with path context) if it is not valid JSON.
pub fn load_at(path: &Path) -> Result<WatchList, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse(&contents, path)
}

/// Parse watch-list JSON. `origin` is used for error context only.
///
/// Entries whose `source` is missing or not a string are skipped with a
/// warning rather than failing the whole list.
pub fn parse(contents: &str, origin: &Path) -> Result<WatchList, ConfigError> {
    let root: Value = serde_json::from_str(contents).map_err(|e| ConfigError::WatchList {
        path: origin.to_path_buf(),
        source: e,
    })?;
    let Value::Object(items) = root else {
        return Err(ConfigError::WatchListShape {
            path: origin.to_path_buf(),
        });
    };

    let mut entries = Vec::with_capacity(items.len());
    for (relative_path, item) in items {
        match item.get("source").and_then(Value::as_str) {
            Some(source) => {
                tracing::debug!(path = %relative_path, source, "watch-list entry");
                entries.push(WatchTarget::new(relative_path, WatchScope::from(source)));
            }
            None => {
                tracing::warn!(
                    path = %relative_path,
                    "watch-list entry has no string `source`; not watching it",
                );
            }
        }
    }
    Ok(WatchList { entries })
}
