pub mod crm;
pub mod features;
pub mod logs_cmd;
pub mod performance;
pub mod permissions;
pub mod serve;
pub mod status;

use extpanel_channels::{
    BackgroundService, Channel, HttpChannel, LocalChannel, NoPageProber, PageProber,
    SnapshotProber,
};
use extpanel_core::{Config, Paths, Request, Response};
use extpanel_storage::{ExtensionState, JsonFileKvStore, StateOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Build the background service from config: file-backed state plus the
/// page prober for the configured snapshot, if any.
pub fn build_service(config: &Config, paths: &Paths) -> anyhow::Result<Arc<BackgroundService>> {
    paths.ensure_dirs()?;
    let store = JsonFileKvStore::open(&paths.storage_file(), config.storage.quota_bytes)?;
    let state = Arc::new(ExtensionState::new(
        Arc::new(store),
        StateOptions::from_config(config),
    ));

    let prober: Arc<dyn PageProber> = match config.page.snapshot_path.as_deref() {
        Some(path) => {
            debug!(path = %path, "Attaching page snapshot");
            Arc::new(SnapshotProber::open(Path::new(path))?)
        }
        None => Arc::new(NoPageProber),
    };

    Ok(Arc::new(BackgroundService::new(
        state,
        prober,
        config.probe_timeout(),
    )))
}

/// Popup-side handle on the bridge. In local mode the background service
/// lives on a task owned by this value.
pub struct Popup {
    channel: Box<dyn Channel>,
    _background: Option<tokio::task::JoinHandle<()>>,
}

impl Popup {
    pub async fn connect(remote: Option<String>) -> anyhow::Result<Self> {
        let paths = Paths::default();
        let config = Config::load_or_default(&paths)?;

        if let Some(url) = remote.or_else(|| config.remote_url()) {
            debug!(url = %url, "Using remote background process");
            return Ok(Self {
                channel: Box::new(HttpChannel::new(&url)),
                _background: None,
            });
        }

        let service = build_service(&config, &paths)?;
        service.state().initialize_if_absent().await?;
        let (channel, handle) = LocalChannel::spawn(service, config.bridge.buffer_size);
        Ok(Self {
            channel: Box::new(channel),
            _background: Some(handle),
        })
    }

    /// Send one request; a transport failure or `success: false` becomes an error.
    pub async fn call(&self, request: Request) -> anyhow::Result<Response> {
        let action = request.action();
        let response = match self.channel.send(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(action, error = %e, "Bridge call failed");
                anyhow::bail!("{} failed: {}", action, e);
            }
        };
        if !response.success {
            let reason = response.error.as_deref().unwrap_or("unknown error");
            anyhow::bail!("{} failed: {}", action, reason);
        }
        Ok(response)
    }

    /// Like [`Popup::call`] but hands back failed responses for rendering.
    pub async fn try_call(&self, request: Request) -> anyhow::Result<Response> {
        let action = request.action();
        self.channel.send(request).await.map_err(|e| {
            warn!(action, error = %e, "Bridge call failed");
            anyhow::anyhow!("{} failed: {}", action, e)
        })
    }
}

pub fn on_off(flag: bool) -> &'static str {
    if flag {
        "✓ on"
    } else {
        "✗ off"
    }
}
