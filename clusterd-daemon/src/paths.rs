//! Install-root layout. Every runtime path hangs off one root directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_NAME: &str = "clusterd";
pub const DEFAULT_ROOT: &str = "/var/ossec";

pub const CONNECT_ATTEMPTS: usize = 5;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub fn socket_path(root: &Path) -> PathBuf {
    root.join("queue").join("ossec").join("cluster_db")
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join("var").join("db").join("cluster_db")
}

pub fn watch_list_path(root: &Path) -> PathBuf {
    root.join("framework").join("wazuh").join("cluster.json")
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join("etc").join(format!("{DAEMON_NAME}.yaml"))
}

pub fn pid_dir(root: &Path) -> PathBuf {
    root.join("var").join("run")
}

pub fn pid_path(root: &Path, pid: u32) -> PathBuf {
    pid_dir(root).join(format!("{DAEMON_NAME}-{pid}.pid"))
}

/// Join a watch-list path fragment such as `/etc/shared/` onto `root`.
pub fn resolve_relative(root: &Path, relative_path: &str) -> PathBuf {
    let trimmed = relative_path.trim_start_matches('/');
    if trimmed.is_empty() {
        root.to_path_buf()
    } else {
        root.join(trimmed)
    }
}
