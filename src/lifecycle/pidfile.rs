//! Single-instance guard.
//!
//! The PID file is locked exclusively for the life of the process. A second
//! instance fails to take the lock and refuses to start.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("cannot open pid file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another instance is running (pid file {path} is locked)")]
    AlreadyRunning { path: PathBuf },

    #[error("cannot lock pid file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write pid file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Held lock on the PID file; released when dropped.
#[derive(Debug)]
pub struct PidFile {
    file: File,
    path: PathBuf,
}

impl PidFile {
    /// Lock `path` and write the current process ID into it.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| PidFileError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                return Err(PidFileError::AlreadyRunning {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(PidFileError::Lock {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        let write_err = |source| PidFileError::Write {
            path: path.to_path_buf(),
            source,
        };
        file.set_len(0).map_err(write_err)?;
        writeln!(file, "{}", std::process::id()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;

        tracing::debug!(path = %path.display(), pid = std::process::id(), "PID file locked");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
