use std::path::PathBuf;

use clusterd_core::{settings, ResponseMode, Settings};

use crate::error::DaemonError;
use crate::paths;

/// Everything the dispatcher and watcher need, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub root: PathBuf,
    /// Role used for watch-list scope matching; empty matches only `all`.
    pub node_role: String,
    pub response_mode: ResponseMode,
    pub credential_file_name: String,
    pub socket_path: PathBuf,
    pub db_path: PathBuf,
    pub watch_list_path: PathBuf,
}

impl DaemonConfig {
    /// Defaults for `root` with no settings file applied.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self::from_settings(root.into(), Settings::default(), None)
    }

    /// Read `<root>/etc/clusterd.yaml` (if present) and apply `role_override`
    /// on top of it.
    pub fn load(root: impl Into<PathBuf>, role_override: Option<String>) -> Result<Self, DaemonError> {
        let root = root.into();
        let settings = settings::load_at(&paths::settings_path(&root))?;
        Ok(Self::from_settings(root, settings, role_override))
    }

    pub fn from_settings(root: PathBuf, settings: Settings, role_override: Option<String>) -> Self {
        let node_role = role_override
            .or(settings.node_role)
            .unwrap_or_default();
        let watch_list_path = settings
            .watch_list
            .unwrap_or_else(|| paths::watch_list_path(&root));
        Self {
            socket_path: paths::socket_path(&root),
            db_path: paths::db_path(&root),
            watch_list_path,
            node_role,
            response_mode: settings.response_mode,
            credential_file_name: settings.credential_file_name,
            root,
        }
    }
}
