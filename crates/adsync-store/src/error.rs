use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer held the dataset lock for longer than the configured timeout.
    #[error("timed out after {waited:?} waiting for lock {}", .lock_path.display())]
    LockTimeout { lock_path: PathBuf, waited: Duration },

    /// The existing dataset could not be parsed. The file is left untouched.
    #[error("failed to read dataset {}: {source}", .path.display())]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write dataset {}: {source}", .path.display())]
    DatasetWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rows: {0}")]
    InvalidRows(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
