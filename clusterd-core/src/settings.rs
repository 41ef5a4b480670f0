//! Optional daemon settings file (`<root>/etc/clusterd.yaml`).
//!
//! Every field has a default, so a missing file is equivalent to an empty one.
//! Command-line values take precedence over anything set here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Default credential file name the `/etc/` registration filters on.
pub const DEFAULT_CREDENTIAL_FILE_NAME: &str = "client.keys";

/// How the dispatcher frames responses on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseMode {
    /// One NUL-terminated response per receive, carrying the last command's
    /// rendered output. Compatible with existing cluster clients.
    #[default]
    PerRead,
    /// Newline-delimited requests; one response line per command.
    PerCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Node role used for scope matching when `-t` is not given.
    pub node_role: Option<String>,
    pub response_mode: ResponseMode,
    pub credential_file_name: String,
    /// Watch-list location; defaults to the install-root layout.
    pub watch_list: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_role: None,
            response_mode: ResponseMode::default(),
            credential_file_name: DEFAULT_CREDENTIAL_FILE_NAME.to_string(),
            watch_list: None,
        }
    }
}

/// Load settings from `path`, falling back to defaults when it does not exist.
pub fn load_at(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Settings {
        path: path.to_path_buf(),
        source: e,
    })
}
