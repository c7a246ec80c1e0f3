use extpanel_core::{FeatureKey, FeatureSet, Request};
use serde_json::json;

use super::{on_off, Popup};

fn render(features: &FeatureSet) {
    println!();
    println!("🧩 Features");
    println!();
    println!(
        "  {:<20} {}",
        FeatureKey::ContentScript,
        on_off(features.content_script.enabled)
    );
    for domain in &features.content_script.domains {
        println!("     - {}", domain);
    }
    println!(
        "  {:<20} {}  (memory: {})",
        FeatureKey::BackgroundServices,
        on_off(features.background_services.enabled),
        features.background_services.memory_usage
    );
    println!(
        "  {:<20} {}  ({})",
        FeatureKey::BrowserApi,
        on_off(features.browser_api.enabled),
        features.browser_api.api_calls
    );
    println!("     apis: {}", features.browser_api.apis.join(", "));
    println!();
}

pub async fn list(popup: &Popup) -> anyhow::Result<()> {
    let features: FeatureSet = popup.call(Request::GetFeatures).await?.field("features")?;
    render(&features);
    Ok(())
}

pub async fn toggle(popup: &Popup, name: &str) -> anyhow::Result<()> {
    let feature: FeatureKey = name.parse()?;
    let features: FeatureSet = popup
        .call(Request::SetFeatures { feature, updates: None })
        .await?
        .field("features")?;
    println!(
        "✓ {} is now {}",
        feature,
        if features.is_enabled(feature) { "enabled" } else { "disabled" }
    );
    render(&features);
    Ok(())
}

pub async fn set_domains(popup: &Popup, domains: Vec<String>) -> anyhow::Result<()> {
    update(popup, FeatureKey::ContentScript, json!({ "domains": domains })).await
}

pub async fn set_apis(popup: &Popup, apis: Vec<String>) -> anyhow::Result<()> {
    update(popup, FeatureKey::BrowserApi, json!({ "apis": apis })).await
}

async fn update(popup: &Popup, feature: FeatureKey, updates: serde_json::Value) -> anyhow::Result<()> {
    let features: FeatureSet = popup
        .call(Request::SetFeatures { feature, updates: Some(updates) })
        .await?
        .field("features")?;
    println!("✓ {} updated", feature);
    render(&features);
    Ok(())
}
