use async_trait::async_trait;
use extpanel_core::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

pub const FEATURES_KEY: &str = "features";
pub const PERMISSIONS_KEY: &str = "permissions";
pub const LOGS_KEY: &str = "logs";

/// Key-value persistence with the browser local-storage contract: failures
/// are logged and reported as `None`/`false`, never raised.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: &Value) -> bool;

    async fn remove(&self, key: &str) -> bool;

    /// Drop every key.
    async fn clear(&self) -> bool;
}

fn to_object(entries: &HashMap<String, Value>) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

fn within_quota(quota_bytes: u64, used: usize, key: &str) -> bool {
    if quota_bytes == 0 || used as u64 <= quota_bytes {
        return true;
    }
    warn!(key = %key, used, quota = quota_bytes, "Storage quota exceeded");
    false
}

/// In-memory store, used for tests and ephemeral sessions.
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Value>>,
    quota_bytes: u64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_quota(0)
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes,
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &Value) -> bool {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.clone());
        if !within_quota(self.quota_bytes, to_object(&next).to_string().len(), key) {
            return false;
        }
        *entries = next;
        true
    }

    async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key);
        true
    }

    async fn clear(&self) -> bool {
        self.entries.write().await.clear();
        true
    }
}

/// Store backed by a single JSON object file. Every mutation rewrites the
/// file through a temp file + rename so a crash never leaves a torn file.
///
/// The file is the source of truth: reads and commits reload it, so a CLI
/// and a running background process can share one `storage.json`. `entries`
/// only holds the last good copy for when the file cannot be read.
pub struct JsonFileKvStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Value>>,
    quota_bytes: u64,
}

fn parse_entries(path: &Path, content: &str) -> Result<HashMap<String, Value>> {
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let map: Map<String, Value> = serde_json::from_str(content)
        .map_err(|e| Error::Storage(format!("corrupt store file {}: {}", path.display(), e)))?;
    Ok(map.into_iter().collect())
}

impl JsonFileKvStore {
    pub fn open(path: &Path, quota_bytes: u64) -> Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => parse_entries(path, &content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened storage file");
        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            quota_bytes,
        })
    }

    async fn load(&self) -> Result<HashMap<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_entries(&self.path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp_path, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::Storage(format!("atomic rename failed: {}", e)));
        }
        Ok(())
    }

    async fn commit<F>(&self, key: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut HashMap<String, Value>) + Send,
    {
        let mut entries = self.entries.write().await;
        let mut next = match self.load().await {
            Ok(current) => current,
            Err(e) => {
                error!(key = %key, path = %self.path.display(), error = %e, "Failed to reload storage file");
                return false;
            }
        };
        mutate(&mut next);

        let content = match serde_json::to_string_pretty(&to_object(&next)) {
            Ok(content) => content,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to encode storage file");
                return false;
            }
        };
        if !within_quota(self.quota_bytes, content.len(), key) {
            return false;
        }
        match self.persist(&content).await {
            Ok(()) => {
                *entries = next;
                true
            }
            Err(e) => {
                error!(key = %key, path = %self.path.display(), error = %e, "Failed to write storage file");
                false
            }
        }
    }
}

#[async_trait]
impl KvStore for JsonFileKvStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        match self.load().await {
            Ok(current) => *entries = current,
            Err(e) => {
                warn!(key = %key, path = %self.path.display(), error = %e, "Serving cached value, storage file unreadable");
            }
        }
        entries.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &Value) -> bool {
        self.commit(key, |entries| {
            entries.insert(key.to_string(), value.clone());
        })
        .await
    }

    async fn remove(&self, key: &str) -> bool {
        self.commit(key, |entries| {
            entries.remove(key);
        })
        .await
    }

    async fn clear(&self) -> bool {
        self.commit("*", |entries| entries.clear()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_set_get_remove() {
        let store = MemoryKvStore::new();
        assert!(store.get("features").await.is_none());
        assert!(store.set("features", &json!({"a": 1})).await);
        assert_eq!(store.get("features").await, Some(json!({"a": 1})));
        assert!(store.remove("features").await);
        assert!(store.get("features").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_quota_rejects_without_mutation() {
        let store = MemoryKvStore::with_quota(32);
        assert!(store.set("logs", &json!(["short"])).await);
        assert!(!store.set("logs", &json!(["x".repeat(64)])).await);
        assert_eq!(store.get("logs").await, Some(json!(["short"])));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");

        let store = JsonFileKvStore::open(&path, 0).unwrap();
        assert!(store.set(PERMISSIONS_KEY, &json!({"storage": true})).await);
        assert!(store.set(LOGS_KEY, &json!([])).await);
        assert!(store.remove(LOGS_KEY).await);
        drop(store);

        let reopened = JsonFileKvStore::open(&path, 0).unwrap();
        assert_eq!(reopened.get(PERMISSIONS_KEY).await, Some(json!({"storage": true})));
        assert!(reopened.get(LOGS_KEY).await.is_none());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_two_stores_on_one_file_keep_each_others_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");

        let background = JsonFileKvStore::open(&path, 0).unwrap();
        assert!(background.set(LOGS_KEY, &json!(["boot"])).await);

        let cli = JsonFileKvStore::open(&path, 0).unwrap();
        assert!(cli.set(PERMISSIONS_KEY, &json!({"cookies": true})).await);
        assert!(cli.set(LOGS_KEY, &json!(["cli-entry", "boot"])).await);

        assert_eq!(background.get(LOGS_KEY).await, Some(json!(["cli-entry", "boot"])));
        assert!(background.set(FEATURES_KEY, &json!({"x": true})).await);

        let reopened = JsonFileKvStore::open(&path, 0).unwrap();
        assert_eq!(reopened.get(PERMISSIONS_KEY).await, Some(json!({"cookies": true})));
        assert_eq!(reopened.get(LOGS_KEY).await, Some(json!(["cli-entry", "boot"])));
        assert_eq!(reopened.get(FEATURES_KEY).await, Some(json!({"x": true})));
    }

    #[tokio::test]
    async fn test_file_quota_counts_written_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        let store = JsonFileKvStore::open(&path, 64).unwrap();

        assert!(store.set(LOGS_KEY, &json!(["short"])).await);
        assert!(!store.set(LOGS_KEY, &json!(["x".repeat(40), "y".repeat(10)])).await);
        assert_eq!(store.get(LOGS_KEY).await, Some(json!(["short"])));
        assert!(std::fs::metadata(&path).unwrap().len() <= 64);
    }

    #[tokio::test]
    async fn test_file_store_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        let store = JsonFileKvStore::open(&path, 0).unwrap();
        assert!(store.set(FEATURES_KEY, &json!({})).await);
        assert!(store.clear().await);
        assert!(store.get(FEATURES_KEY).await.is_none());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&content).unwrap(), json!({}));
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonFileKvStore::open(&path, 0), Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_file_store_missing_parent_dir_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        let store = JsonFileKvStore::open(&path, 0).unwrap();
        assert!(store.set(FEATURES_KEY, &json!({"x": true})).await);
        assert!(path.exists());
    }
}
