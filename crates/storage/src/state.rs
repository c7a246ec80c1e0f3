use extpanel_core::{
    Config, Error, FeatureKey, FeatureSet, LogEntry, LogLevel, PermissionName, PermissionSet,
    Result,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::kv::{KvStore, FEATURES_KEY, LOGS_KEY, PERMISSIONS_KEY};

#[derive(Debug, Clone)]
pub struct StateOptions {
    /// Oldest entries are dropped once the log grows past this.
    pub max_log_entries: usize,
    pub permission_grant_delay: Duration,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            max_log_entries: 100,
            permission_grant_delay: Duration::from_millis(1000),
        }
    }
}

impl StateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_log_entries: config.storage.max_log_entries.max(1),
            permission_grant_delay: config.grant_delay(),
        }
    }
}

/// Typed feature/permission/log state on top of a [`KvStore`].
///
/// Built once per process and shared by `Arc`; nothing here keeps a copy of
/// the stored records between calls. Read-modify-write sequences run under
/// `write_lock` so concurrent handlers never lose an update.
pub struct ExtensionState {
    store: Arc<dyn KvStore>,
    options: StateOptions,
    write_lock: Mutex<()>,
}

impl ExtensionState {
    pub fn new(store: Arc<dyn KvStore>, options: StateOptions) -> Self {
        Self {
            store,
            options,
            write_lock: Mutex::new(()),
        }
    }

    /// Write canonical defaults for every key that has no value yet.
    /// Returns how many keys were written.
    pub async fn initialize_if_absent(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut written = 0;
        if self.store.get(FEATURES_KEY).await.is_none() {
            self.write(FEATURES_KEY, &FeatureSet::default()).await?;
            written += 1;
        }
        if self.store.get(PERMISSIONS_KEY).await.is_none() {
            self.write(PERMISSIONS_KEY, &PermissionSet::default()).await?;
            written += 1;
        }
        if self.store.get(LOGS_KEY).await.is_none() {
            let initial = vec![LogEntry::now(LogLevel::Info, "Extension initialized")];
            self.write(LOGS_KEY, &initial).await?;
            written += 1;
        }
        if written > 0 {
            info!(written, "Initialized default extension state");
        }
        Ok(written)
    }

    /// Bulk-clear the store and reinstall defaults.
    pub async fn reset(&self) -> Result<()> {
        {
            let _guard = self.write_lock.lock().await;
            if !self.store.clear().await {
                return Err(Error::Storage("failed to clear store".to_string()));
            }
        }
        self.initialize_if_absent().await?;
        Ok(())
    }

    // -- features --------------------------------------------------------

    pub async fn features(&self) -> Result<FeatureSet> {
        self.read_or_init(FEATURES_KEY, FeatureSet::default).await
    }

    pub async fn toggle_feature(&self, key: FeatureKey) -> Result<FeatureSet> {
        let _guard = self.write_lock.lock().await;
        let mut features: FeatureSet = self.load_or_default(FEATURES_KEY).await?;
        let enabled = features.toggle(key);
        self.write(FEATURES_KEY, &features).await?;
        info!(feature = %key, enabled, "Feature toggled");
        Ok(features)
    }

    pub async fn update_feature(
        &self,
        key: FeatureKey,
        partial: &serde_json::Value,
    ) -> Result<FeatureSet> {
        let _guard = self.write_lock.lock().await;
        let mut features: FeatureSet = self.load_or_default(FEATURES_KEY).await?;
        features.merge(key, partial)?;
        self.write(FEATURES_KEY, &features).await?;
        debug!(feature = %key, "Feature updated");
        Ok(features)
    }

    // -- permissions -----------------------------------------------------

    pub async fn permissions(&self) -> Result<PermissionSet> {
        let perms: PermissionSet = self.read_or_init(PERMISSIONS_KEY, PermissionSet::default).await?;
        Ok(perms.normalized())
    }

    pub async fn toggle_permission(&self, name: PermissionName) -> Result<PermissionSet> {
        if name.is_required() {
            warn!(permission = %name, "Refusing to toggle required permission");
            return Err(Error::PermissionDenied(format!(
                "'{}' is a required permission",
                name
            )));
        }
        let _guard = self.write_lock.lock().await;
        let mut perms = self
            .load_or_default::<PermissionSet>(PERMISSIONS_KEY)
            .await?
            .normalized();
        let granted = !perms.get(name);
        perms.set(name, granted);
        self.write(PERMISSIONS_KEY, &perms).await?;
        info!(permission = %name, granted, "Permission toggled");
        Ok(perms)
    }

    /// Two-phase grant: log the request, wait, then mark granted.
    pub async fn request_permission(&self, name: PermissionName) -> Result<PermissionSet> {
        self.append_log(LogLevel::Info, format!("Requesting permission: {}", name))
            .await?;
        if !self.options.permission_grant_delay.is_zero() {
            tokio::time::sleep(self.options.permission_grant_delay).await;
        }

        let perms = {
            let _guard = self.write_lock.lock().await;
            let mut perms = self
                .load_or_default::<PermissionSet>(PERMISSIONS_KEY)
                .await?
                .normalized();
            perms.set(name, true);
            self.write(PERMISSIONS_KEY, &perms).await?;
            perms
        };
        self.append_log(LogLevel::Info, format!("Permission granted: {}", name))
            .await?;
        info!(permission = %name, "Permission granted");
        Ok(perms)
    }

    // -- logs ------------------------------------------------------------

    /// Newest first.
    pub async fn logs(&self) -> Result<Vec<LogEntry>> {
        self.read_or_init(LOGS_KEY, Vec::new).await
    }

    pub async fn append_log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<Vec<LogEntry>> {
        let _guard = self.write_lock.lock().await;
        let mut logs: Vec<LogEntry> = self.load_or_default(LOGS_KEY).await?;
        logs.insert(0, LogEntry::now(level, message));
        logs.truncate(self.options.max_log_entries);
        self.write(LOGS_KEY, &logs).await?;
        Ok(logs)
    }

    /// Replace the log with a single entry recording the clear.
    pub async fn clear_logs(&self) -> Result<Vec<LogEntry>> {
        let _guard = self.write_lock.lock().await;
        let logs = vec![LogEntry::now(LogLevel::Info, "Logs cleared")];
        self.write(LOGS_KEY, &logs).await?;
        info!("Logs cleared");
        Ok(logs)
    }

    // -- helpers ---------------------------------------------------------

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                warn!(key = %key, error = %e, "Stored value has an unexpected shape");
                Error::Storage(format!("malformed '{}' value: {}", key, e))
            }),
            None => Ok(None),
        }
    }

    /// For callers already holding `write_lock`; they write the result back.
    async fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.load(key).await?.unwrap_or_default())
    }

    /// Unlocked read; an absent key is defaulted under `write_lock` so the
    /// default never lands on top of a concurrent mutation.
    async fn read_or_init<T, F>(&self, key: &str, default: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.load(key).await? {
            return Ok(value);
        }
        let _guard = self.write_lock.lock().await;
        if let Some(value) = self.load(key).await? {
            return Ok(value);
        }
        let value = default();
        self.write(key, &value).await?;
        Ok(value)
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        if self.store.set(key, &value).await {
            Ok(())
        } else {
            Err(Error::Storage(format!("failed to write '{}'", key)))
        }
    }
}
