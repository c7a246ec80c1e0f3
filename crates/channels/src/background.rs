use extpanel_core::{Error, FeatureKey, LogLevel, PermissionName, Request, Response, Result};
use extpanel_storage::ExtensionState;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::prober::{detect_with_backoff, PageProber};

/// One request in flight and the single place its response goes.
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// The long-lived side of the bridge: owns the state handle and the page
/// prober and answers every request with exactly one [`Response`].
pub struct BackgroundService {
    state: Arc<ExtensionState>,
    prober: Arc<dyn PageProber>,
    probe_timeout: Duration,
}

impl BackgroundService {
    pub fn new(
        state: Arc<ExtensionState>,
        prober: Arc<dyn PageProber>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            state,
            prober,
            probe_timeout,
        }
    }

    pub fn state(&self) -> &Arc<ExtensionState> {
        &self.state
    }

    /// Install defaults and record the start in the log store.
    pub async fn start(&self) -> Result<()> {
        self.state.initialize_if_absent().await?;
        self.state
            .append_log(LogLevel::Info, "Background service started")
            .await?;
        info!("Background service started");
        Ok(())
    }

    /// Serve envelopes until every sender is dropped. Each request runs on
    /// its own task so a slow one (a permission grant, a probe) does not
    /// hold up the rest.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Envelope>) {
        info!("Message dispatcher started");
        while let Some(envelope) = rx.recv().await {
            let service = Arc::clone(&self);
            tokio::spawn(async move {
                let action = envelope.request.action();
                let response = service.handle(envelope.request).await;
                if envelope.reply.send(response).is_err() {
                    debug!(action, "Caller went away before the response was ready");
                }
            });
        }
        info!("Message dispatcher stopped");
    }

    /// Parse a raw wire object and handle it.
    pub async fn handle_value(&self, raw: Value) -> Response {
        match Request::from_value(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Rejected malformed request");
                self.record(LogLevel::Warning, format!("Rejected request: {}", e))
                    .await;
                Response::failure(e.to_string())
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let action = request.action();
        debug!(action, "Handling request");
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                let level = match e {
                    Error::Validation(_) | Error::PermissionDenied(_) | Error::NotFound(_) => {
                        LogLevel::Warning
                    }
                    _ => LogLevel::Error,
                };
                match level {
                    LogLevel::Warning => warn!(action, error = %e, "Request failed"),
                    _ => error!(action, error = %e, "Request failed"),
                }
                self.record(level, format!("{} failed: {}", action, e)).await;
                Response::failure(e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::GetFeatures => Response::ok().with("features", self.state.features().await?),
            Request::SetFeatures { feature, updates } => {
                let features = match updates {
                    Some(updates) => self.state.update_feature(feature, &updates).await?,
                    None => {
                        let features = self.state.toggle_feature(feature).await?;
                        let status = if features.is_enabled(feature) { "enabled" } else { "disabled" };
                        self.record(LogLevel::Info, format!("Feature {} {}", feature, status))
                            .await;
                        features
                    }
                };
                Response::ok().with("features", features)
            }
            Request::GetPermissions => {
                Response::ok().with("permissions", self.state.permissions().await?)
            }
            Request::TogglePermission { permission } => {
                let permissions = self.state.toggle_permission(permission).await?;
                let status = if permissions.get(permission) { "granted" } else { "revoked" };
                self.record(LogLevel::Info, format!("Permission {} {}", permission, status))
                    .await;
                Response::ok().with("permissions", permissions)
            }
            Request::RequestPermission { permission } => {
                Response::ok().with("permissions", self.state.request_permission(permission).await?)
            }
            Request::GetLogs => Response::ok().with("logs", self.state.logs().await?),
            Request::AddLog { level, message } => {
                Response::ok().with("logs", self.state.append_log(level, message).await?)
            }
            Request::ClearLogs => Response::ok().with("logs", self.state.clear_logs().await?),
            Request::GetPageMetrics => {
                let metrics = self.probe(self.prober.page_metrics()).await?;
                Response::ok().with("metrics", metrics)
            }
            Request::ExecuteScript { script } => {
                self.require_permission(PermissionName::Scripting).await?;
                let result = self.probe(self.prober.execute_script(&script)).await?;
                self.record(LogLevel::Info, format!("Script injected: {}", script))
                    .await;
                Response::ok().with("result", result)
            }
            Request::CheckDynamicsCrm => {
                self.require_content_script().await?;
                let detection = self.probe(self.prober.check()).await?;
                if detection.detected {
                    let version = detection.version.as_deref().unwrap_or("unknown");
                    self.record(LogLevel::Info, format!("Dynamics CRM detected (version {})", version))
                        .await;
                } else {
                    self.record(LogLevel::Warning, "Dynamics CRM not detected on page")
                        .await;
                }
                let mut response = Response::ok().with("detected", detection.detected)?;
                if let Some(version) = detection.version {
                    response = response.with("version", version)?;
                }
                Ok(response)
            }
            Request::GetDynamicsCrmFields => {
                self.require_content_script().await?;
                let fields = self.probe(self.prober.fields()).await?;
                self.record(LogLevel::Info, format!("Found {} CRM fields", fields.len()))
                    .await;
                Response::ok().with("fields", fields)
            }
            Request::SetDynamicsCrmField { field, value } => {
                self.require_content_script().await?;
                let stored = self.probe(self.prober.set_field(&field, &value)).await?;
                self.record(LogLevel::Info, format!("Set CRM field {}", field)).await;
                Response::ok().with("field", &field)?.with("value", stored)
            }
            Request::FillDynamicsCrmForm { values } => {
                self.require_content_script().await?;
                let filled = self.probe(self.prober.fill_form(&values)).await?;
                let level = if filled < values.len() { LogLevel::Warning } else { LogLevel::Info };
                self.record(level, format!("Filled {} of {} CRM fields", filled, values.len()))
                    .await;
                Response::ok().with("filled", filled)
            }
        }
    }

    /// Spawn-once page-load detection: retries with the capped backoff
    /// schedule and records the outcome in the log store.
    pub async fn detect_on_load(&self, schedule: &[Duration]) -> Result<bool> {
        self.require_content_script().await?;
        let detection = detect_with_backoff(self.prober.as_ref(), schedule).await?;
        if detection.detected {
            let version = detection.version.as_deref().unwrap_or("unknown");
            self.record(LogLevel::Info, format!("Dynamics CRM detected (version {})", version))
                .await;
        } else {
            self.record(
                LogLevel::Warning,
                format!("Dynamics CRM not detected after {} attempts", schedule.len()),
            )
            .await;
        }
        Ok(detection.detected)
    }

    async fn probe<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.probe_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "page did not respond within {} ms",
                self.probe_timeout.as_millis()
            ))),
        }
    }

    async fn require_content_script(&self) -> Result<()> {
        if self.state.features().await?.is_enabled(FeatureKey::ContentScript) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(
                "content script feature is disabled".to_string(),
            ))
        }
    }

    async fn require_permission(&self, name: PermissionName) -> Result<()> {
        if self.state.permissions().await?.get(name) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!("'{}' permission not granted", name)))
        }
    }

    /// Best-effort append to the log store; a failure here only goes to tracing.
    async fn record(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        if let Err(e) = self.state.append_log(level, message.clone()).await {
            error!(error = %e, message = %message, "Failed to record log entry");
        }
    }
}
