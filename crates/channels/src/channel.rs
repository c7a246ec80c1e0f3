use async_trait::async_trait;
use extpanel_core::{Error, Request, Response, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::background::{BackgroundService, Envelope};

/// Capability to reach the background process. Every call gets exactly one
/// response; there is no timeout at this layer.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// In-process channel to a spawned [`BackgroundService`] loop.
#[derive(Clone)]
pub struct LocalChannel {
    tx: mpsc::Sender<Envelope>,
}

impl LocalChannel {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Start `service` on its own task and return a channel into it.
    pub fn spawn(service: Arc<BackgroundService>, buffer_size: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let handle = tokio::spawn(service.run(rx));
        (Self::new(tx), handle)
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn send(&self, request: Request) -> Result<Response> {
        let action = request.action();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| Error::Channel("background service is not listening".to_string()))?;
        let response = rx
            .await
            .map_err(|_| Error::Channel(format!("no response to '{}'", action)))?;
        debug!(action, success = response.success, "Response received");
        Ok(response)
    }
}

/// Talks to a background process serving `POST /v1/message`.
pub struct HttpChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChannel {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn send(&self, request: Request) -> Result<Response> {
        let url = format!("{}/v1/message", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("request to {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Channel(format!("{} returned {}", url, status)));
        }
        resp.json::<Response>()
            .await
            .map_err(|e| Error::Channel(format!("malformed response from {}: {}", url, e)))
    }
}

/// Bound a single call for callers that need bounded latency.
pub async fn send_with_timeout(
    channel: &dyn Channel,
    request: Request,
    timeout: Duration,
) -> Result<Response> {
    let action = request.action();
    match tokio::time::timeout(timeout, channel.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "'{}' got no response within {} ms",
            action,
            timeout.as_millis()
        ))),
    }
}
