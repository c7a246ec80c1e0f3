use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Upper bound on the serialized size of the whole store, in bytes.
    /// `0` disables the check.
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
}

fn default_quota_bytes() -> u64 {
    // Same budget as the browser's local extension storage.
    5 * 1024 * 1024
}

fn default_max_log_entries() -> usize {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_bytes: default_quota_bytes(),
            max_log_entries: default_max_log_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsConfig {
    /// Delay between "requesting" and "granted" when a permission is requested.
    #[serde(default = "default_grant_delay_ms")]
    pub grant_delay_ms: u64,
}

fn default_grant_delay_ms() -> u64 {
    1000
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            grant_delay_ms: default_grant_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// When set, the popup talks to a running background process at this URL
    /// instead of spawning one in-process.
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18790
}

fn default_probe_timeout_ms() -> u64 {
    8000
}

fn default_buffer_size() -> usize {
    64
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            remote_url: None,
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    /// JSON page snapshot the prober operates on. No snapshot means no page
    /// is attached and every probe fails.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub page: PageConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn grant_delay(&self) -> Duration {
        Duration::from_millis(self.permissions.grant_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge.probe_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bridge.host, self.bridge.port)
    }

    pub fn remote_url(&self) -> Option<String> {
        let url = self.bridge.remote_url.as_ref()?.trim();
        if url.is_empty() {
            None
        } else {
            Some(url.trim_end_matches('/').to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.storage.max_log_entries, 100);
        assert_eq!(cfg.storage.quota_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.bridge.probe_timeout_ms, 8000);
        assert_eq!(cfg.permissions.grant_delay_ms, 1000);
        assert!(cfg.page.snapshot_path.is_none());
    }

    #[test]
    fn test_partial_bridge_section() {
        let raw = r#"{ "bridge": { "port": 9000, "remoteUrl": "http://localhost:9000/" } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.bridge.port, 9000);
        assert_eq!(cfg.bridge.host, "127.0.0.1");
        assert_eq!(cfg.remote_url().as_deref(), Some("http://localhost:9000"));
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_blank_remote_url_is_none() {
        let raw = r#"{ "bridge": { "remoteUrl": "  " } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(cfg.remote_url().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let mut cfg = Config::default();
        cfg.storage.max_log_entries = 7;
        cfg.save(&paths.config_file()).unwrap();

        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.storage.max_log_entries, 7);
    }
}
