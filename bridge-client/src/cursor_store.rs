//! Persistence of the target network sync cursor.

use crate::files::{read_optional, write_private_file};
use async_trait::async_trait;
use bridge_types::SyncCursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// File name of the cursor inside the data directory.
pub const CURSOR_FILE: &str = "since.json";

/// Cursor store errors.
#[derive(Debug, Error)]
pub enum CursorStoreError {
    /// Reading or writing the file failed.
    #[error("cursor file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not hold a JSON string.
    #[error("malformed cursor file {path}: {source}")]
    Malformed {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Durable storage for the sync cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor; empty if none was saved.
    async fn load(&self) -> Result<SyncCursor, CursorStoreError>;

    /// Replace the saved cursor.
    async fn save(&self, cursor: &SyncCursor) -> Result<(), CursorStoreError>;
}

/// Cursor stored as a JSON string in `since.json`.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// Store in `data_dir/since.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CURSOR_FILE),
        }
    }

    /// Store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CursorStoreError {
        CursorStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<SyncCursor, CursorStoreError> {
        let Some(bytes) = read_optional(&self.path).await.map_err(|e| self.io_error(e))? else {
            return Ok(SyncCursor::empty());
        };
        serde_json::from_slice(&bytes).map_err(|source| CursorStoreError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<(), CursorStoreError> {
        let bytes = serde_json::to_vec(cursor).map_err(|source| CursorStoreError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        write_private_file(&self.path, &bytes)
            .await
            .map_err(|e| self.io_error(e))
    }
}

/// Cursor kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    cursor: Arc<Mutex<SyncCursor>>,
}

impl MemoryCursorStore {
    /// Start from `cursor`.
    pub fn new(cursor: SyncCursor) -> Self {
        Self {
            cursor: Arc::new(Mutex::new(cursor)),
        }
    }

    /// Current value.
    pub fn current(&self) -> SyncCursor {
        self.cursor.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<SyncCursor, CursorStoreError> {
        Ok(self.current())
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<(), CursorStoreError> {
        *self.cursor.lock().unwrap_or_else(|p| p.into_inner()) = cursor.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn absent_file_is_empty_cursor() {
        let dir = tempdir().unwrap();
        let store = FileCursorStore::in_dir(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = FileCursorStore::in_dir(dir.path());
        store.save(&SyncCursor::new("s1_2_3")).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "\"s1_2_3\"");

        let reloaded = FileCursorStore::in_dir(dir.path());
        assert_eq!(reloaded.load().await.unwrap(), SyncCursor::new("s1_2_3"));
    }

    #[tokio::test]
    async fn malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CURSOR_FILE);
        std::fs::write(&path, "{not json").unwrap();

        let store = FileCursorStore::at(&path);
        assert!(matches!(
            store.load().await,
            Err(CursorStoreError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryCursorStore::default();
        store.save(&SyncCursor::new("x")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), SyncCursor::new("x"));
    }
}
