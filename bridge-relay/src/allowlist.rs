//! Identities whose group chat invitations are accepted automatically.
//!
//! Stored as `allowlist.json`, a JSON object mapping the hex identity to the
//! unix time it was added. Every change rewrites the whole file while the
//! store's lock is held.

use bridge_client::files::{read_optional, write_private_file};
use bridge_types::ShortId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// File name of the allow-list inside the data directory.
pub const ALLOWLIST_FILE: &str = "allowlist.json";

/// Allow-list errors.
#[derive(Debug, Error)]
pub enum AllowListError {
    /// The identity is already listed.
    #[error("{0} is already allowed")]
    AlreadyAllowed(ShortId),

    /// The identity is not listed.
    #[error("{0} was not allowed")]
    NotAllowed(ShortId),

    /// Reading or writing the file failed.
    #[error("allow-list file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a JSON object of timestamps.
    #[error("malformed allow-list file {path}: {source}")]
    Malformed {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed allow-list.
#[derive(Debug)]
pub struct AllowListStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, i64>>,
}

impl AllowListStore {
    /// Load `data_dir/allowlist.json`; an absent file is an empty list.
    pub async fn load(data_dir: &Path) -> Result<Self, AllowListError> {
        let path = data_dir.join(ALLOWLIST_FILE);
        let bytes = read_optional(&path).await.map_err(|source| AllowListError::Io {
            path: path.clone(),
            source,
        })?;
        let entries = match bytes {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| AllowListError::Malformed {
                path: path.clone(),
                source,
            })?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if `id` is listed.
    pub async fn contains(&self, id: &ShortId) -> bool {
        self.entries.lock().await.contains_key(&id.to_string())
    }

    /// List `id`, stamped with the current time.
    pub async fn add(&self, id: &ShortId) -> Result<(), AllowListError> {
        let mut entries = self.entries.lock().await;
        let key = id.to_string();
        if entries.contains_key(&key) {
            return Err(AllowListError::AlreadyAllowed(*id));
        }

        let mut updated = entries.clone();
        updated.insert(key, unix_now());
        self.persist(&updated).await?;
        *entries = updated;
        info!(id = %id, "added to allow-list");
        Ok(())
    }

    /// Unlist `id`.
    pub async fn remove(&self, id: &ShortId) -> Result<(), AllowListError> {
        let mut entries = self.entries.lock().await;
        let key = id.to_string();
        if !entries.contains_key(&key) {
            return Err(AllowListError::NotAllowed(*id));
        }

        let mut updated = entries.clone();
        updated.remove(&key);
        self.persist(&updated).await?;
        *entries = updated;
        info!(id = %id, "removed from allow-list");
        Ok(())
    }

    /// `(identity, added_at)` pairs in identity order.
    pub async fn entries(&self) -> Vec<(String, i64)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(id, added)| (id.clone(), *added))
            .collect()
    }

    async fn persist(&self, entries: &BTreeMap<String, i64>) -> Result<(), AllowListError> {
        let bytes = serde_json::to_vec(entries).map_err(|source| AllowListError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        write_private_file(&self.path, &bytes)
            .await
            .map_err(|source| AllowListError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(byte: u8) -> ShortId {
        ShortId::from_bytes(&[byte; 32]).unwrap()
    }

    #[tokio::test]
    async fn absent_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = AllowListStore::load(dir.path()).await.unwrap();
        assert!(store.entries().await.is_empty());
        assert!(!store.contains(&id(1)).await);
    }

    #[tokio::test]
    async fn add_and_remove_persist() {
        let dir = tempdir().unwrap();
        let store = AllowListStore::load(dir.path()).await.unwrap();
        store.add(&id(1)).await.unwrap();
        store.add(&id(2)).await.unwrap();
        store.remove(&id(1)).await.unwrap();

        let reloaded = AllowListStore::load(dir.path()).await.unwrap();
        assert!(!reloaded.contains(&id(1)).await);
        assert!(reloaded.contains(&id(2)).await);

        let entries = reloaded.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "02".repeat(32));
        assert!(entries[0].1 > 0);
    }

    #[tokio::test]
    async fn double_add_and_missing_remove_fail() {
        let dir = tempdir().unwrap();
        let store = AllowListStore::load(dir.path()).await.unwrap();
        store.add(&id(7)).await.unwrap();

        assert!(matches!(store.add(&id(7)).await, Err(AllowListError::AlreadyAllowed(_))));
        assert!(matches!(store.remove(&id(8)).await, Err(AllowListError::NotAllowed(_))));
    }

    #[tokio::test]
    async fn malformed_file_is_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(ALLOWLIST_FILE), "[1, 2]").unwrap();
        assert!(matches!(
            AllowListStore::load(dir.path()).await,
            Err(AllowListError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempdir().unwrap();
        let key = "ab".repeat(32);
        std::fs::write(
            dir.path().join(ALLOWLIST_FILE),
            format!("{{\"{}\": 1700000000}}", key),
        )
        .unwrap();

        let store = AllowListStore::load(dir.path()).await.unwrap();
        assert!(store.contains(&key.parse().unwrap()).await);
    }
}
