use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, dispatcher, watcher and client.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("configuration error: {0}")]
    Config(#[from] clusterd_core::ConfigError),

    #[error("status store error: {0}")]
    Store(#[from] clusterd_store::StoreError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("dispatcher is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    /// A fatal error, tagged with the unit of work that raised it.
    #[error("{subsystem}: {source}")]
    Fatal {
        subsystem: &'static str,
        #[source]
        source: Box<DaemonError>,
    },
}

impl DaemonError {
    pub(crate) fn in_subsystem(self, subsystem: &'static str) -> Self {
        match self {
            already @ DaemonError::Fatal { .. } => already,
            other => DaemonError::Fatal {
                subsystem,
                source: Box::new(other),
            },
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
