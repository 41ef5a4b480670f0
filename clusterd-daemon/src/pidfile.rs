use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};
use crate::paths;

/// `<root>/var/run/clusterd-<pid>.pid`, holding the process id.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(root: &Path) -> Result<Self, DaemonError> {
        Self::create_for(root, std::process::id())
    }

    pub fn create_for(root: &Path, pid: u32) -> Result<Self, DaemonError> {
        let dir = paths::pid_dir(root);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = paths::pid_path(root, pid);
        fs::write(&path, format!("{pid}\n")).map_err(|e| io_err(&path, e))?;
        tracing::debug!(path = %path.display(), "wrote pid file");
        Ok(Self { path })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) -> Result<(), DaemonError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&self.path, err)),
        }
    }
}
