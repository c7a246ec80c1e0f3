use extpanel_core::{Config, Paths};

use super::build_service;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("extpanel status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗ (using defaults)" }
    );
    let storage_path = paths.storage_file();
    println!(
        "Storage:   {} {}",
        storage_path.display(),
        if storage_path.exists() { "✓" } else { "✗ (not created yet)" }
    );

    let config = Config::load_or_default(&paths)?;
    println!(
        "Page:      {}",
        config.page.snapshot_path.as_deref().unwrap_or("(none attached)")
    );
    match config.remote_url() {
        Some(url) => println!("Bridge:    remote {}", url),
        None => println!("Bridge:    in-process (serve binds {})", config.bind_addr()),
    }
    println!();
    println!("Log cap:        {} entries", config.storage.max_log_entries);
    println!("Probe timeout:  {} ms", config.bridge.probe_timeout_ms);
    Ok(())
}

/// Bulk-clear local state and reinstall defaults.
pub async fn reset(force: bool) -> anyhow::Result<()> {
    if !force {
        println!("This wipes features, permissions and logs. Re-run with --force to confirm.");
        return Ok(());
    }
    let paths = Paths::default();
    let config = Config::load_or_default(&paths)?;
    let service = build_service(&config, &paths)?;
    service.state().reset().await?;
    println!("✓ Extension state reset to defaults");
    Ok(())
}
