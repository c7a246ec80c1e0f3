use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKey {
    #[serde(rename = "contentScript")]
    ContentScript,
    #[serde(rename = "backgroundServices")]
    BackgroundServices,
    #[serde(rename = "browserApi")]
    BrowserApi,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 3] = [
        FeatureKey::ContentScript,
        FeatureKey::BackgroundServices,
        FeatureKey::BrowserApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::ContentScript => "contentScript",
            FeatureKey::BackgroundServices => "backgroundServices",
            FeatureKey::BrowserApi => "browserApi",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FeatureKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FeatureKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown feature '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContentScriptFeature {
    pub enabled: bool,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackgroundServicesFeature {
    pub enabled: bool,
    /// Display label only, e.g. "12.4 MB".
    pub memory_usage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BrowserApiFeature {
    pub enabled: bool,
    pub apis: Vec<String>,
    /// Display label only, e.g. "0 calls/min".
    pub api_calls: String,
}

impl Default for ContentScriptFeature {
    fn default() -> Self {
        Self {
            enabled: true,
            domains: vec![
                "*.dynamics.com".to_string(),
                "*.crm.dynamics.com".to_string(),
                "*.crm4.dynamics.com".to_string(),
            ],
        }
    }
}

impl Default for BackgroundServicesFeature {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_usage: "12.4 MB".to_string(),
        }
    }
}

impl Default for BrowserApiFeature {
    fn default() -> Self {
        Self {
            enabled: true,
            apis: ["storage", "tabs", "scripting", "cookies"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            api_calls: "0 calls/min".to_string(),
        }
    }
}

/// The persisted `features` value: one record per [`FeatureKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    pub content_script: ContentScriptFeature,
    pub background_services: BackgroundServicesFeature,
    pub browser_api: BrowserApiFeature,
}

impl FeatureSet {
    pub fn is_enabled(&self, key: FeatureKey) -> bool {
        match key {
            FeatureKey::ContentScript => self.content_script.enabled,
            FeatureKey::BackgroundServices => self.background_services.enabled,
            FeatureKey::BrowserApi => self.browser_api.enabled,
        }
    }

    pub fn toggle(&mut self, key: FeatureKey) -> bool {
        let enabled = match key {
            FeatureKey::ContentScript => &mut self.content_script.enabled,
            FeatureKey::BackgroundServices => &mut self.background_services.enabled,
            FeatureKey::BrowserApi => &mut self.browser_api.enabled,
        };
        *enabled = !*enabled;
        *enabled
    }

    /// Shallow-merge `partial` into the record named by `key`.
    ///
    /// Only fields the record already has may be set, and the merged record
    /// must still have the right shape; otherwise nothing changes.
    pub fn merge(&mut self, key: FeatureKey, partial: &serde_json::Value) -> Result<()> {
        let patch = partial.as_object().ok_or_else(|| {
            Error::Validation(format!("updates for '{}' must be an object", key))
        })?;

        let mut record = match key {
            FeatureKey::ContentScript => serde_json::to_value(&self.content_script)?,
            FeatureKey::BackgroundServices => serde_json::to_value(&self.background_services)?,
            FeatureKey::BrowserApi => serde_json::to_value(&self.browser_api)?,
        };
        if let Some(obj) = record.as_object_mut() {
            for (field, value) in patch {
                if !obj.contains_key(field) {
                    return Err(Error::Validation(format!(
                        "feature '{}' has no field '{}'",
                        key, field
                    )));
                }
                obj.insert(field.clone(), value.clone());
            }
        }

        let invalid = |e: serde_json::Error| Error::Validation(format!("invalid update for '{}': {}", key, e));
        match key {
            FeatureKey::ContentScript => {
                self.content_script = serde_json::from_value(record).map_err(invalid)?
            }
            FeatureKey::BackgroundServices => {
                self.background_services = serde_json::from_value(record).map_err(invalid)?
            }
            FeatureKey::BrowserApi => {
                self.browser_api = serde_json::from_value(record).map_err(invalid)?
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionName {
    Storage,
    Tabs,
    Cookies,
    WebNavigation,
    Scripting,
    Bookmarks,
    Notifications,
}

impl PermissionName {
    pub const ALL: [PermissionName; 7] = [
        PermissionName::Storage,
        PermissionName::Tabs,
        PermissionName::Cookies,
        PermissionName::WebNavigation,
        PermissionName::Scripting,
        PermissionName::Bookmarks,
        PermissionName::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionName::Storage => "storage",
            PermissionName::Tabs => "tabs",
            PermissionName::Cookies => "cookies",
            PermissionName::WebNavigation => "webNavigation",
            PermissionName::Scripting => "scripting",
            PermissionName::Bookmarks => "bookmarks",
            PermissionName::Notifications => "notifications",
        }
    }

    /// Required permissions are always granted and cannot be revoked.
    pub fn is_required(&self) -> bool {
        matches!(self, PermissionName::Storage)
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PermissionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PermissionName::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown permission '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub storage: bool,
    pub tabs: bool,
    pub cookies: bool,
    pub web_navigation: bool,
    pub scripting: bool,
    pub bookmarks: bool,
    pub notifications: bool,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            storage: true,
            tabs: true,
            cookies: false,
            web_navigation: false,
            scripting: false,
            bookmarks: false,
            notifications: false,
        }
    }
}

impl PermissionSet {
    pub fn get(&self, name: PermissionName) -> bool {
        match name {
            PermissionName::Storage => self.storage,
            PermissionName::Tabs => self.tabs,
            PermissionName::Cookies => self.cookies,
            PermissionName::WebNavigation => self.web_navigation,
            PermissionName::Scripting => self.scripting,
            PermissionName::Bookmarks => self.bookmarks,
            PermissionName::Notifications => self.notifications,
        }
    }

    pub fn set(&mut self, name: PermissionName, granted: bool) {
        let slot = match name {
            PermissionName::Storage => &mut self.storage,
            PermissionName::Tabs => &mut self.tabs,
            PermissionName::Cookies => &mut self.cookies,
            PermissionName::WebNavigation => &mut self.web_navigation,
            PermissionName::Scripting => &mut self.scripting,
            PermissionName::Bookmarks => &mut self.bookmarks,
            PermissionName::Notifications => &mut self.notifications,
        };
        *slot = granted || name.is_required();
    }

    /// Force every required permission back on.
    pub fn normalized(mut self) -> Self {
        self.storage = true;
        self
    }

    pub fn granted(&self) -> Vec<PermissionName> {
        PermissionName::ALL
            .into_iter()
            .filter(|p| self.get(*p))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(Error::Validation(format!("unknown log level '{}'", s))),
        }
    }
}

pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// UTC, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = chrono::Utc::now().format(LOG_TIMESTAMP_FORMAT).to_string();
        Self::new(level, message, timestamp)
    }
}
