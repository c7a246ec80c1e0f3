use extpanel_channels::PageMetrics;
use extpanel_core::{FeatureSet, Request};

use super::Popup;

pub async fn run(popup: &Popup) -> anyhow::Result<()> {
    let features: FeatureSet = popup.call(Request::GetFeatures).await?.field("features")?;

    println!();
    println!("📈 Performance");
    println!();
    println!("  Memory usage:  {}", features.background_services.memory_usage);
    println!("  API calls:     {}", features.browser_api.api_calls);
    println!();

    let resp = popup.try_call(Request::GetPageMetrics).await?;
    if !resp.success {
        println!("  Page metrics:  unavailable ({})", resp.error.as_deref().unwrap_or("unknown"));
        return Ok(());
    }
    let metrics: PageMetrics = resp.field("metrics")?;
    println!("  Page metrics:");
    println!("    load time            {} ms", metrics.load_time_ms);
    println!("    DOMContentLoaded     {} ms", metrics.dom_content_loaded_ms);
    println!("    DOM nodes            {}", metrics.dom_nodes);
    println!("    resources            {}", metrics.resource_count);
    Ok(())
}
