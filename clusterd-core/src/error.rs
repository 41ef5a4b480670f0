//! Error types for clusterd-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the watch list or daemon settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The watch list is not valid JSON.
    #[error("failed to parse watch list at {path}: {source}")]
    WatchList {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The watch list parsed, but its top level is not an object.
    #[error("watch list at {path} must be a JSON object keyed by relative path")]
    WatchListShape { path: PathBuf },

    /// The settings file is not valid YAML for [`crate::settings::Settings`].
    #[error("failed to parse settings at {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A status string outside `synchronized | pending | failed | invalid`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown file status '{0}'; expected: synchronized, pending, failed, invalid")]
pub struct ParseStatusError(pub String);

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
