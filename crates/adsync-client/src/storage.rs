//! Durable storage for the [`TokenRecord`].
//!
//! Storage is whole-record replace: every save overwrites the previous record.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::ClientError;
use crate::token::TokenRecord;

/// Where the current token record lives between runs.
pub trait TokenStorage: Send + Sync {
    /// Loads the persisted record, or `None` if nothing has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenStorage`] if the record exists but cannot
    /// be read or decoded.
    fn load(&self) -> Result<Option<TokenRecord>, ClientError>;

    /// Replaces the persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenStorage`] if the record cannot be written.
    fn save(&self, record: &TokenRecord) -> Result<(), ClientError>;

    /// Human-readable location for diagnostics.
    fn location(&self) -> String;
}

/// JSON file on disk, rewritten atomically on every save.
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_err(&self, reason: impl std::fmt::Display) -> ClientError {
        ClientError::TokenStorage {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<Option<TokenRecord>, ClientError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.storage_err(e)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| self.storage_err(e))
    }

    fn save(&self, record: &TokenRecord) -> Result<(), ClientError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| self.storage_err(e))?;

        let json = serde_json::to_vec_pretty(record).map_err(|e| self.storage_err(e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.storage_err(e))?;
        tmp.write_all(&json).map_err(|e| self.storage_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.storage_err(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.storage_err(e.error))?;

        tracing::info!(path = %self.path.display(), "token record saved");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process storage, for tests and embedders that manage persistence elsewhere.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    record: Mutex<Option<TokenRecord>>,
}

impl MemoryTokenStorage {
    #[must_use]
    pub fn new(record: Option<TokenRecord>) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    /// Returns a copy of the currently stored record.
    #[must_use]
    pub fn snapshot(&self) -> Option<TokenRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<Option<TokenRecord>, ClientError> {
        Ok(self.snapshot())
    }

    fn save(&self, record: &TokenRecord) -> Result<(), ClientError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenRecord {
        serde_json::from_value(serde_json::json!({
            "access_token": "APP_USR-1",
            "refresh_token": "TG-1",
            "user_id": 7
        }))
        .unwrap()
    }

    #[test]
    fn file_storage_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("tokens.json"));
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn file_storage_round_trips_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("nested/auth/tokens.json"));
        storage.save(&sample()).unwrap();
        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn file_storage_overwrites_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("tokens.json"));
        storage.save(&sample()).unwrap();

        let mut replacement = sample();
        replacement.access_token = "APP_USR-2".into();
        replacement.user_id = None;
        storage.save(&replacement).unwrap();

        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "APP_USR-2");
        assert!(loaded.user_id.is_none());
    }

    #[test]
    fn file_storage_reports_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileTokenStorage::new(&path).load().unwrap_err();
        assert!(matches!(err, ClientError::TokenStorage { .. }));
    }

    #[test]
    fn memory_storage_replaces_record() {
        let storage = MemoryTokenStorage::default();
        assert!(storage.load().unwrap().is_none());
        storage.save(&sample()).unwrap();
        assert_eq!(storage.snapshot(), Some(sample()));
    }
}
