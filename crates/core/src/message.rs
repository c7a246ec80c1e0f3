use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::{FeatureKey, LogLevel, PermissionName};

/// A popup-to-background request: `{ "action": "...", ...payload }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetFeatures,
    /// Toggles `feature` when `updates` is absent, merges `updates` otherwise.
    SetFeatures {
        feature: FeatureKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updates: Option<Value>,
    },
    GetPermissions,
    RequestPermission {
        permission: PermissionName,
    },
    TogglePermission {
        permission: PermissionName,
    },
    GetLogs,
    AddLog {
        level: LogLevel,
        message: String,
    },
    ClearLogs,
    GetPageMetrics,
    ExecuteScript {
        script: String,
    },
    #[serde(rename = "checkDynamicsCRM")]
    CheckDynamicsCrm,
    #[serde(rename = "getDynamicsCRMFields")]
    GetDynamicsCrmFields,
    #[serde(rename = "setDynamicsCRMField")]
    SetDynamicsCrmField { field: String, value: Value },
    #[serde(rename = "fillDynamicsCRMForm")]
    FillDynamicsCrmForm { values: Map<String, Value> },
}

impl Request {
    pub const ACTIONS: [&'static str; 14] = [
        "getFeatures",
        "setFeatures",
        "getPermissions",
        "requestPermission",
        "togglePermission",
        "getLogs",
        "addLog",
        "clearLogs",
        "getPageMetrics",
        "executeScript",
        "checkDynamicsCRM",
        "getDynamicsCRMFields",
        "setDynamicsCRMField",
        "fillDynamicsCRMForm",
    ];

    pub fn action(&self) -> &'static str {
        match self {
            Request::GetFeatures => "getFeatures",
            Request::SetFeatures { .. } => "setFeatures",
            Request::GetPermissions => "getPermissions",
            Request::RequestPermission { .. } => "requestPermission",
            Request::TogglePermission { .. } => "togglePermission",
            Request::GetLogs => "getLogs",
            Request::AddLog { .. } => "addLog",
            Request::ClearLogs => "clearLogs",
            Request::GetPageMetrics => "getPageMetrics",
            Request::ExecuteScript { .. } => "executeScript",
            Request::CheckDynamicsCrm => "checkDynamicsCRM",
            Request::GetDynamicsCrmFields => "getDynamicsCRMFields",
            Request::SetDynamicsCrmField { .. } => "setDynamicsCRMField",
            Request::FillDynamicsCrmForm { .. } => "fillDynamicsCRMForm",
        }
    }

    /// Parse a raw wire object, reporting unknown actions and bad payloads
    /// as validation errors.
    pub fn from_value(value: Value) -> Result<Self> {
        let action = value
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("request has no 'action'".to_string()))?
            .to_string();
        if !Self::ACTIONS.contains(&action.as_str()) {
            return Err(Error::Validation(format!("Unknown action: {}", action)));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("invalid '{}' request: {}", action, e)))
    }
}

/// Exactly one response per request: `{ "success": bool, "error"?: string, ...fields }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Result<Self> {
        self.data.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Decode a result field, treating a failed response as an error.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        if !self.success {
            return Err(Error::Other(
                self.error.clone().unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        let value = self
            .data
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("response field '{}'", key)))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names_match_wire_tag() {
        let samples = vec![
            Request::GetFeatures,
            Request::SetFeatures { feature: FeatureKey::BrowserApi, updates: None },
            Request::GetPermissions,
            Request::RequestPermission { permission: PermissionName::Cookies },
            Request::TogglePermission { permission: PermissionName::Tabs },
            Request::GetLogs,
            Request::AddLog { level: LogLevel::Info, message: "m".into() },
            Request::ClearLogs,
            Request::GetPageMetrics,
            Request::ExecuteScript { script: "content".into() },
            Request::CheckDynamicsCrm,
            Request::GetDynamicsCrmFields,
            Request::SetDynamicsCrmField { field: "name".into(), value: json!("Contoso") },
            Request::FillDynamicsCrmForm { values: Map::new() },
        ];
        assert_eq!(samples.len(), Request::ACTIONS.len());
        for (req, action) in samples.iter().zip(Request::ACTIONS) {
            let wire = serde_json::to_value(req).unwrap();
            assert_eq!(wire["action"], json!(action));
            assert_eq!(req.action(), action);
            assert_eq!(&Request::from_value(wire).unwrap(), req);
        }
    }

    #[test]
    fn test_parse_flat_payload() {
        let req = Request::from_value(json!({
            "action": "setFeatures",
            "feature": "contentScript",
            "updates": {"domains": ["foo.com"]}
        }))
        .unwrap();
        assert_eq!(
            req,
            Request::SetFeatures {
                feature: FeatureKey::ContentScript,
                updates: Some(json!({"domains": ["foo.com"]})),
            }
        );
    }

    #[test]
    fn test_unknown_action_and_bad_payload() {
        let err = Request::from_value(json!({"action": "reboot"})).unwrap_err();
        assert!(err.to_string().contains("Unknown action: reboot"));

        let err = Request::from_value(json!({"action": "togglePermission", "permission": "history"}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(Request::from_value(json!({"feature": "browserApi"})).is_err());
    }

    #[test]
    fn test_response_wire_shape() {
        let resp = Response::ok().with("count", 3).unwrap();
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"success": true, "count": 3}));
        assert_eq!(resp.field::<u32>("count").unwrap(), 3);

        let failed = Response::failure("boom");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"success": false, "error": "boom"})
        );
        assert!(failed.field::<u32>("count").is_err());

        let parsed: Response = serde_json::from_value(json!({"success": true, "logs": []})).unwrap();
        assert!(parsed.data.contains_key("logs"));
    }
}
