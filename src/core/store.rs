use crate::core::models::AccountSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Small-blob persistence the cache is written through to.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Stores each key as a file below a root directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("smol-monitor"))
    }

    pub fn open_default() -> Result<Self> {
        let root = Self::default_root().context("Could not determine data directory")?;
        Ok(Self::new(root))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Write then rename so a crash never leaves a half-written snapshot
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
        Ok(())
    }
}

/// A snapshot as it was persisted, with the time it was saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub saved_at: DateTime<Utc>,
    pub account: AccountSnapshot,
}

/// Last-good snapshot per account, used as the cold-start fallback.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn KeyValueStore>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn key_for(account_name: &str) -> String {
        format!("smol/{account_name}_account.json")
    }

    pub async fn save(
        &self,
        account_name: &str,
        snapshot: &AccountSnapshot,
        saved_at: DateTime<Utc>,
    ) -> Result<()> {
        let document = CachedSnapshotRef {
            saved_at,
            account: snapshot,
        };
        let bytes = serde_json::to_vec(&document).context("Failed to serialize snapshot")?;
        self.store.save(&Self::key_for(account_name), &bytes).await?;
        tracing::debug!(account = %account_name, "Saved account data");
        Ok(())
    }

    /// Unreadable or corrupt entries count as "no cache".
    pub async fn load(&self, account_name: &str) -> Option<CachedSnapshot> {
        let bytes = match self.store.load(&Self::key_for(account_name)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(account = %account_name, error = %e, "Failed to read cached account data");
                return None;
            }
        };

        match serde_json::from_slice::<CachedSnapshot>(&bytes) {
            Ok(cached) => {
                tracing::debug!(account = %account_name, saved_at = %cached.saved_at, "Loaded cached account data");
                Some(cached)
            }
            Err(e) => {
                tracing::warn!(account = %account_name, error = %e, "Ignoring corrupt cached account data");
                None
            }
        }
    }
}

#[derive(Serialize)]
struct CachedSnapshotRef<'a> {
    saved_at: DateTime<Utc>,
    account: &'a AccountSnapshot,
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_saves: bool,
    }

    impl MemoryStore {
        pub fn failing() -> Self {
            Self {
                entries: Mutex::default(),
                fail_saves: true,
            }
        }

        pub async fn insert(&self, key: &str, bytes: &[u8]) {
            self.entries.lock().await.insert(key.to_string(), bytes.to_vec());
        }
    }

    #[async_trait]
    impl KeyValueStore for MemoryStore {
        async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
            if self.fail_saves {
                anyhow::bail!("disk full");
            }
            self.insert(key, bytes).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use crate::core::models::fixtures::snapshot;
    use chrono::TimeZone;

    fn saved_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 8, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(Arc::new(FileStore::new(dir.path())));
        let snap = snapshot("LAUNDRY");

        cache.save("home", &snap, saved_at()).await.unwrap();
        assert!(dir.path().join("smol/home_account.json").exists());

        let loaded = cache.load("home").await.unwrap();
        assert_eq!(loaded.account, snap);
        assert_eq!(loaded.saved_at, saved_at());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(Arc::new(FileStore::new(dir.path())));

        cache.save("home", &snapshot("OLD"), saved_at()).await.unwrap();
        cache.save("home", &snapshot("NEW"), saved_at()).await.unwrap();

        let loaded = cache.load("home").await.unwrap();
        assert_eq!(loaded.account, snapshot("NEW"));
    }

    #[tokio::test]
    async fn test_load_missing_account_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(Arc::new(FileStore::new(dir.path())));
        assert!(cache.load("nobody").await.is_none());
    }

    #[tokio::test]
    async fn test_accounts_are_isolated() {
        let store = Arc::new(MemoryStore::default());
        let cache = SnapshotCache::new(store);

        cache.save("home", &snapshot("HOME"), saved_at()).await.unwrap();
        assert!(cache.load("office").await.is_none());
        assert_eq!(cache.load("home").await.unwrap().account, snapshot("HOME"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_treated_as_missing() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert(&SnapshotCache::key_for("home"), b"{not json")
            .await;
        let cache = SnapshotCache::new(store);
        assert!(cache.load("home").await.is_none());
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let cache = SnapshotCache::new(Arc::new(MemoryStore::failing()));
        assert!(cache.save("home", &snapshot("X"), saved_at()).await.is_err());
    }
}
