use async_trait::async_trait;
use extpanel_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Delays before each re-detection attempt after a page load.
pub const REDETECT_BACKOFF_MS: [u64; 5] = [500, 1000, 2000, 3000, 5000];

pub fn redetect_schedule() -> Vec<Duration> {
    REDETECT_BACKOFF_MS.iter().map(|ms| Duration::from_millis(*ms)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmDetection {
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Which lookup located the form object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    #[serde(default)]
    pub load_time_ms: u64,
    #[serde(default)]
    pub dom_content_loaded_ms: u64,
    #[serde(default)]
    pub dom_nodes: u64,
    #[serde(default)]
    pub resource_count: u64,
}

/// Page-side collaborator: inspects the attached page and pokes values into
/// the CRM form model. Callers bound every call with their own timeout.
#[async_trait]
pub trait PageProber: Send + Sync {
    async fn check(&self) -> Result<CrmDetection>;

    async fn fields(&self) -> Result<Vec<FieldInfo>>;

    /// Returns the value now held by the field.
    async fn set_field(&self, field: &str, value: &Value) -> Result<Value>;

    /// Returns how many fields were filled.
    async fn fill_form(&self, values: &Map<String, Value>) -> Result<usize>;

    async fn page_metrics(&self) -> Result<PageMetrics>;

    async fn execute_script(&self, script: &str) -> Result<Value>;
}

/// Used when no page is attached.
pub struct NoPageProber;

fn no_page<T>() -> Result<T> {
    Err(Error::Probe("No page attached".to_string()))
}

#[async_trait]
impl PageProber for NoPageProber {
    async fn check(&self) -> Result<CrmDetection> {
        no_page()
    }

    async fn fields(&self) -> Result<Vec<FieldInfo>> {
        no_page()
    }

    async fn set_field(&self, _field: &str, _value: &Value) -> Result<Value> {
        no_page()
    }

    async fn fill_form(&self, _values: &Map<String, Value>) -> Result<usize> {
        no_page()
    }

    async fn page_metrics(&self) -> Result<PageMetrics> {
        no_page()
    }

    async fn execute_script(&self, _script: &str) -> Result<Value> {
        no_page()
    }
}

// ---------------------------------------------------------------------------
// Snapshot-backed prober
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default = "default_field_kind")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub read_only: bool,
}

fn default_field_kind() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, CrmField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSnapshot {
    #[serde(default)]
    pub name: String,
    /// Vendor global reachable from this frame's window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xrm: Option<CrmForm>,
    /// Form context handed to the frame by the host page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_context: Option<CrmForm>,
}

/// Serialized view of a visited page: top window, its frames and metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xrm: Option<CrmForm>,
    #[serde(default)]
    pub frames: Vec<FrameSnapshot>,
    #[serde(default)]
    pub metrics: PageMetrics,
    #[serde(default)]
    pub executed_scripts: Vec<String>,
}

/// Where a strategy found the form object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormHandle {
    TopWindow,
    FrameXrm(usize),
    FrameFormContext(usize),
}

impl FormHandle {
    pub fn resolve<'a>(&self, page: &'a PageSnapshot) -> Option<&'a CrmForm> {
        match *self {
            FormHandle::TopWindow => page.xrm.as_ref(),
            FormHandle::FrameXrm(i) => page.frames.get(i)?.xrm.as_ref(),
            FormHandle::FrameFormContext(i) => page.frames.get(i)?.form_context.as_ref(),
        }
    }

    pub fn resolve_mut<'a>(&self, page: &'a mut PageSnapshot) -> Option<&'a mut CrmForm> {
        match *self {
            FormHandle::TopWindow => page.xrm.as_mut(),
            FormHandle::FrameXrm(i) => page.frames.get_mut(i)?.xrm.as_mut(),
            FormHandle::FrameFormContext(i) => page.frames.get_mut(i)?.form_context.as_mut(),
        }
    }
}

pub trait LocateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_locate(&self, page: &PageSnapshot) -> Option<FormHandle>;
}

pub struct TopWindowXrm;

impl LocateStrategy for TopWindowXrm {
    fn name(&self) -> &'static str {
        "topWindow"
    }

    fn try_locate(&self, page: &PageSnapshot) -> Option<FormHandle> {
        page.xrm.as_ref().map(|_| FormHandle::TopWindow)
    }
}

pub struct FrameXrm;

impl LocateStrategy for FrameXrm {
    fn name(&self) -> &'static str {
        "frameXrm"
    }

    fn try_locate(&self, page: &PageSnapshot) -> Option<FormHandle> {
        page.frames
            .iter()
            .position(|f| f.xrm.is_some())
            .map(FormHandle::FrameXrm)
    }
}

pub struct FrameFormContext;

impl LocateStrategy for FrameFormContext {
    fn name(&self) -> &'static str {
        "frameFormContext"
    }

    fn try_locate(&self, page: &PageSnapshot) -> Option<FormHandle> {
        page.frames
            .iter()
            .position(|f| f.form_context.is_some())
            .map(FormHandle::FrameFormContext)
    }
}

pub fn default_strategies() -> Vec<Box<dyn LocateStrategy>> {
    vec![Box::new(TopWindowXrm), Box::new(FrameXrm), Box::new(FrameFormContext)]
}

/// Probes a [`PageSnapshot`], optionally writing field changes back to the
/// file it was loaded from.
pub struct SnapshotProber {
    page: Mutex<PageSnapshot>,
    strategies: Vec<Box<dyn LocateStrategy>>,
    source: Option<PathBuf>,
}

impl SnapshotProber {
    pub fn new(page: PageSnapshot) -> Self {
        Self {
            page: Mutex::new(page),
            strategies: default_strategies(),
            source: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let page: PageSnapshot = serde_json::from_str(&content)?;
        debug!(path = %path.display(), url = %page.url, frames = page.frames.len(), "Loaded page snapshot");
        Ok(Self {
            page: Mutex::new(page),
            strategies: default_strategies(),
            source: Some(path.to_path_buf()),
        })
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn LocateStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub async fn snapshot(&self) -> PageSnapshot {
        self.page.lock().await.clone()
    }

    fn locate(&self, page: &PageSnapshot) -> Option<(FormHandle, &'static str)> {
        self.strategies.iter().find_map(|s| {
            let handle = s.try_locate(page)?;
            debug!(strategy = s.name(), ?handle, "Located CRM form");
            Some((handle, s.name()))
        })
    }

    fn locate_or_err(&self, page: &PageSnapshot) -> Result<FormHandle> {
        self.locate(page)
            .map(|(h, _)| h)
            .ok_or_else(|| Error::Probe("Dynamics CRM form object not found".to_string()))
    }

    async fn save(&self, page: &PageSnapshot) -> Result<()> {
        if let Some(path) = &self.source {
            let content = serde_json::to_string_pretty(page)?;
            tokio::fs::write(path, content).await?;
        }
        Ok(())
    }
}

fn write_field(form: &mut CrmForm, name: &str, value: &Value) -> Result<Value> {
    let field = form
        .attributes
        .get_mut(name)
        .ok_or_else(|| Error::NotFound(format!("field '{}'", name)))?;
    if field.read_only {
        return Err(Error::Validation(format!("field '{}' is read-only", name)));
    }
    field.value = value.clone();
    Ok(field.value.clone())
}

#[async_trait]
impl PageProber for SnapshotProber {
    async fn check(&self) -> Result<CrmDetection> {
        let page = self.page.lock().await;
        Ok(match self.locate(&page) {
            Some((handle, strategy)) => CrmDetection {
                detected: true,
                version: handle.resolve(&page).and_then(|f| f.version.clone()),
                strategy: Some(strategy.to_string()),
            },
            None => CrmDetection {
                detected: false,
                version: None,
                strategy: None,
            },
        })
    }

    async fn fields(&self) -> Result<Vec<FieldInfo>> {
        let page = self.page.lock().await;
        let handle = self.locate_or_err(&page)?;
        let form = handle
            .resolve(&page)
            .ok_or_else(|| Error::Probe("form object vanished".to_string()))?;
        Ok(form
            .attributes
            .iter()
            .map(|(name, f)| FieldInfo {
                name: name.clone(),
                label: f.label.clone(),
                kind: f.kind.clone(),
                value: f.value.clone(),
                read_only: f.read_only,
            })
            .collect())
    }

    async fn set_field(&self, field: &str, value: &Value) -> Result<Value> {
        let mut page = self.page.lock().await;
        let handle = self.locate_or_err(&page)?;
        let form = handle
            .resolve_mut(&mut page)
            .ok_or_else(|| Error::Probe("form object vanished".to_string()))?;
        let stored = write_field(form, field, value)?;
        self.save(&page).await?;
        info!(field = %field, "CRM field set");
        Ok(stored)
    }

    async fn fill_form(&self, values: &Map<String, Value>) -> Result<usize> {
        let mut page = self.page.lock().await;
        let handle = self.locate_or_err(&page)?;
        let form = handle
            .resolve_mut(&mut page)
            .ok_or_else(|| Error::Probe("form object vanished".to_string()))?;

        let mut filled = 0;
        for (name, value) in values {
            match write_field(form, name, value) {
                Ok(_) => filled += 1,
                Err(e) => warn!(field = %name, error = %e, "Skipping field"),
            }
        }
        if filled > 0 {
            self.save(&page).await?;
        }
        info!(filled, requested = values.len(), "CRM form filled");
        Ok(filled)
    }

    async fn page_metrics(&self) -> Result<PageMetrics> {
        Ok(self.page.lock().await.metrics.clone())
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        let script = script.trim();
        if script.is_empty() {
            return Err(Error::Validation("script name is empty".to_string()));
        }
        let mut page = self.page.lock().await;
        page.executed_scripts.push(script.to_string());
        let frames = page.frames.len() + 1;
        self.save(&page).await?;
        Ok(json!({ "injected": script, "frames": frames }))
    }
}

/// Run detection once per entry of `schedule`, sleeping that long before
/// each attempt. Stops at the first positive detection.
pub async fn detect_with_backoff(
    prober: &dyn PageProber,
    schedule: &[Duration],
) -> Result<CrmDetection> {
    let mut last = CrmDetection {
        detected: false,
        version: None,
        strategy: None,
    };
    for (attempt, delay) in schedule.iter().enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(*delay).await;
        }
        match prober.check().await {
            Ok(detection) if detection.detected => {
                debug!(attempt = attempt + 1, "CRM detected");
                return Ok(detection);
            }
            Ok(detection) => last = detection,
            Err(e) => {
                debug!(attempt = attempt + 1, error = %e, "Detection attempt failed");
            }
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn form(version: &str) -> CrmForm {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "firstname".to_string(),
            CrmField {
                label: Some("First Name".to_string()),
                ..Default::default()
            },
        );
        attributes.insert(
            "createdon".to_string(),
            CrmField {
                kind: "datetime".to_string(),
                read_only: true,
                ..Default::default()
            },
        );
        CrmForm {
            version: Some(version.to_string()),
            attributes,
        }
    }

    fn framed_page() -> PageSnapshot {
        PageSnapshot {
            url: "https://org.crm4.dynamics.com/main.aspx".to_string(),
            frames: vec![
                FrameSnapshot {
                    name: "nav".to_string(),
                    form_context: Some(form("8.2")),
                    ..Default::default()
                },
                FrameSnapshot {
                    name: "contentIFrame0".to_string(),
                    xrm: Some(form("9.2")),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_strategies_tried_in_order() {
        let prober = SnapshotProber::new(framed_page());
        let detection = prober.check().await.unwrap();
        assert!(detection.detected);
        assert_eq!(detection.strategy.as_deref(), Some("frameXrm"));
        assert_eq!(detection.version.as_deref(), Some("9.2"));

        let mut page = framed_page();
        page.xrm = Some(form("9.1"));
        let prober = SnapshotProber::new(page);
        assert_eq!(prober.check().await.unwrap().strategy.as_deref(), Some("topWindow"));
    }

    #[tokio::test]
    async fn test_custom_strategy_list() {
        let prober = SnapshotProber::new(framed_page())
            .with_strategies(vec![Box::new(FrameFormContext)]);
        let detection = prober.check().await.unwrap();
        assert_eq!(detection.version.as_deref(), Some("8.2"));
    }

    #[tokio::test]
    async fn test_not_detected_on_plain_page() {
        let prober = SnapshotProber::new(PageSnapshot::default());
        assert!(!prober.check().await.unwrap().detected);
        assert!(matches!(prober.fields().await, Err(Error::Probe(_))));
    }

    #[tokio::test]
    async fn test_set_field_rules() {
        let prober = SnapshotProber::new(framed_page());
        let stored = prober.set_field("firstname", &json!("Ada")).await.unwrap();
        assert_eq!(stored, json!("Ada"));
        assert!(matches!(
            prober.set_field("createdon", &json!("2024-01-01")).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            prober.set_field("nope", &json!(1)).await,
            Err(Error::NotFound(_))
        ));

        let fields = prober.fields().await.unwrap();
        let first = fields.iter().find(|f| f.name == "firstname").unwrap();
        assert_eq!(first.value, json!("Ada"));
        assert_eq!(first.label.as_deref(), Some("First Name"));
    }

    #[tokio::test]
    async fn test_fill_form_counts_writable_fields() {
        let prober = SnapshotProber::new(framed_page());
        let mut values = Map::new();
        values.insert("firstname".to_string(), json!("Grace"));
        values.insert("createdon".to_string(), json!("x"));
        values.insert("missing".to_string(), json!("y"));
        assert_eq!(prober.fill_form(&values).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_changes_written_back_to_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.json");
        std::fs::write(&path, serde_json::to_string(&framed_page()).unwrap()).unwrap();

        let prober = SnapshotProber::open(&path).unwrap();
        prober.set_field("firstname", &json!("Linus")).await.unwrap();
        prober.execute_script("content.js").await.unwrap();

        let reloaded = SnapshotProber::open(&path).unwrap().snapshot().await;
        assert_eq!(
            reloaded.frames[1].xrm.as_ref().unwrap().attributes["firstname"].value,
            json!("Linus")
        );
        assert_eq!(reloaded.executed_scripts, vec!["content.js".to_string()]);
    }

    #[tokio::test]
    async fn test_no_page_prober_fails_everything() {
        let prober = NoPageProber;
        assert!(prober.check().await.is_err());
        assert!(prober.page_metrics().await.is_err());
        assert!(prober.execute_script("x").await.is_err());
    }

    struct LateProber {
        calls: AtomicUsize,
        detect_on: usize,
    }

    #[async_trait]
    impl PageProber for LateProber {
        async fn check(&self) -> Result<CrmDetection> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CrmDetection {
                detected: n >= self.detect_on,
                version: None,
                strategy: None,
            })
        }
        async fn fields(&self) -> Result<Vec<FieldInfo>> {
            Ok(vec![])
        }
        async fn set_field(&self, _field: &str, value: &Value) -> Result<Value> {
            Ok(value.clone())
        }
        async fn fill_form(&self, _values: &Map<String, Value>) -> Result<usize> {
            Ok(0)
        }
        async fn page_metrics(&self) -> Result<PageMetrics> {
            Ok(PageMetrics::default())
        }
        async fn execute_script(&self, _script: &str) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_backoff_stops_on_detection() {
        let prober = LateProber { calls: AtomicUsize::new(0), detect_on: 3 };
        let schedule = vec![Duration::ZERO; 5];
        assert!(detect_with_backoff(&prober, &schedule).await.unwrap().detected);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backoff_gives_up_after_schedule() {
        let prober = LateProber { calls: AtomicUsize::new(0), detect_on: 99 };
        let schedule = vec![Duration::ZERO; REDETECT_BACKOFF_MS.len()];
        assert!(!detect_with_backoff(&prober, &schedule).await.unwrap().detected);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
        assert_eq!(redetect_schedule()[4], Duration::from_millis(5000));
    }
}
