//! Domain types for cluster file-sync status tracking.
//!
//! Identifiers are plain strings on the wire and in the store; the newtypes
//! keep manager and file identifiers from being swapped at call sites.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseStatusError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a peer node ("manager") whose file-sync status is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagerId(pub String);

impl ManagerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ManagerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ManagerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a monitored file, relative to the install root
/// (e.g. `/etc/shared/agent.conf`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId(pub String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Whether a manager's copy of a file is believed current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FileStatus {
    Synchronized,
    #[default]
    Pending,
    Failed,
    Invalid,
}

impl FileStatus {
    /// All persistable values, in schema order.
    pub const ALL: [FileStatus; 4] = [
        FileStatus::Synchronized,
        FileStatus::Pending,
        FileStatus::Failed,
        FileStatus::Invalid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Synchronized => "synchronized",
            FileStatus::Pending => "pending",
            FileStatus::Failed => "failed",
            FileStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One persisted row: the status of `file_id` on `manager_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSyncRecord {
    pub manager_id: ManagerId,
    pub file_id: FileId,
    pub status: FileStatus,
}

/// Role a watch-list entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchScope {
    /// Relevant on every node (`"all"` in the watch list).
    All,
    /// Relevant only on nodes running with this role.
    Role(String),
}

impl WatchScope {
    pub const ALL_KEYWORD: &'static str = "all";

    /// `true` when a node running as `node_role` should watch this entry.
    pub fn applies_to(&self, node_role: &str) -> bool {
        match self {
            WatchScope::All => true,
            WatchScope::Role(role) => role == node_role,
        }
    }
}

impl From<&str> for WatchScope {
    fn from(s: &str) -> Self {
        if s == Self::ALL_KEYWORD {
            WatchScope::All
        } else {
            WatchScope::Role(s.to_owned())
        }
    }
}

impl fmt::Display for WatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchScope::All => f.write_str(Self::ALL_KEYWORD),
            WatchScope::Role(role) => f.write_str(role),
        }
    }
}

/// A configured file or directory of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    /// Path fragment relative to the install root, e.g. `/etc/shared/`.
    pub relative_path: String,
    pub scope: WatchScope,
}

impl WatchTarget {
    pub fn new(relative_path: impl Into<String>, scope: WatchScope) -> Self {
        Self {
            relative_path: relative_path.into(),
            scope,
        }
    }

    pub fn is_active_for(&self, node_role: &str) -> bool {
        self.scope.applies_to(node_role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in FileStatus::ALL {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "stale".parse::<FileStatus>().unwrap_err();
        assert!(err.to_string().contains("stale"));
        assert!("Pending".parse::<FileStatus>().is_err(), "case sensitive");
    }

    #[rstest]
    #[case::all_on_unset_role("all", "", true)]
    #[case::all_on_master("all", "master", true)]
    #[case::same_role("master", "master", true)]
    #[case::other_role("master", "client", false)]
    #[case::unset_role_only_matches_all("client", "", false)]
    fn watch_scope_matching(#[case] source: &str, #[case] node_role: &str, #[case] expected: bool) {
        let target = WatchTarget::new("/etc/client.keys", WatchScope::from(source));
        assert_eq!(target.is_active_for(node_role), expected);
        assert_eq!(WatchScope::from(source).to_string(), source);
    }
}
