use axum::{
    body::Bytes,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use extpanel_core::{Response, Result};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::background::BackgroundService;

async fn handle_message(
    State(service): State<Arc<BackgroundService>>,
    body: Bytes,
) -> impl IntoResponse {
    match serde_json::from_slice::<Value>(&body) {
        Ok(raw) => Json(service.handle_value(raw).await),
        Err(e) => {
            warn!(error = %e, "Rejected message body");
            Json(Response::failure(format!("Invalid message body: {}", e)))
        }
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn router(service: Arc<BackgroundService>) -> Router {
    Router::new()
        .route("/v1/message", post(handle_message))
        .route("/v1/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve the bridge over HTTP until `shutdown` resolves.
pub async fn serve_http<F>(
    service: Arc<BackgroundService>,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Bridge listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, HttpChannel};
    use crate::prober::NoPageProber;
    use extpanel_core::{PermissionSet, Request};
    use extpanel_storage::{ExtensionState, MemoryKvStore, StateOptions};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_http_round_trip() {
        let state = Arc::new(ExtensionState::new(
            Arc::new(MemoryKvStore::new()),
            StateOptions {
                max_log_entries: 100,
                permission_grant_delay: Duration::ZERO,
            },
        ));
        let service = Arc::new(BackgroundService::new(state, Arc::new(NoPageProber), Duration::from_secs(8)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_http(service, listener, async move {
            let _ = stop_rx.await;
        }));

        let channel = HttpChannel::new(&format!("http://{}", addr));
        let resp = channel.send(Request::GetPermissions).await.unwrap();
        let perms: PermissionSet = resp.field("permissions").unwrap();
        assert_eq!(perms, PermissionSet::default());

        let client = reqwest::Client::new();
        let raw: Value = client
            .post(format!("http://{}/v1/message", addr))
            .json(&json!({"action": "nope"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(raw["success"], json!(false));

        let raw: Value = client
            .post(format!("http://{}/v1/message", addr))
            .header("content-type", "text/plain")
            .body("{not json")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(raw["success"], json!(false));
        assert!(raw["error"].as_str().unwrap().starts_with("Invalid message body"));

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_background_is_channel_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let channel = HttpChannel::new(&format!("http://{}", addr));
        assert!(matches!(
            channel.send(Request::GetLogs).await,
            Err(extpanel_core::Error::Channel(_))
        ));
    }
}
