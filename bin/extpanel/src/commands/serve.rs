use extpanel_channels::{redetect_schedule, serve_http};
use extpanel_core::{Config, Paths};
use std::sync::Arc;
use tracing::{info, warn};

use super::build_service;

/// Run the background process: the bridge over HTTP until Ctrl+C.
pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::default();
    let mut config = Config::load_or_default(&paths)?;
    if let Some(host) = host {
        config.bridge.host = host;
    }
    if let Some(port) = port {
        config.bridge.port = port;
    }

    let service = build_service(&config, &paths)?;
    service.start().await?;

    if config.page.snapshot_path.is_some() {
        let detector = Arc::clone(&service);
        tokio::spawn(async move {
            match detector.detect_on_load(&redetect_schedule()).await {
                Ok(true) => info!("Page detection finished: CRM present"),
                Ok(false) => info!("Page detection finished: CRM absent"),
                Err(e) => warn!(error = %e, "Page detection skipped"),
            }
        });
    }

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("🚀 extpanel background listening on http://{}", bind_addr);
    println!("   Storage: {}", paths.storage_file().display());
    println!("   Press Ctrl+C to stop.");

    serve_http(service, listener, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;
    Ok(())
}
