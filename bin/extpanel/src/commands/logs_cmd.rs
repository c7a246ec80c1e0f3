use extpanel_core::{LogEntry, LogLevel, Paths, Request};
use std::path::PathBuf;

use super::Popup;
use crate::log_view::{self, LogView};

fn level_marker(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "ℹ️ ",
        LogLevel::Warning => "⚠️ ",
        LogLevel::Error => "❌",
    }
}

fn print_entry(entry: &LogEntry) {
    println!(
        "  {} {}  {:<7}  {}",
        level_marker(entry.level),
        entry.timestamp,
        entry.level,
        entry.message
    );
}

/// Show the log tab: filter by level and/or search text, `pages` windows of 5.
pub async fn list(
    popup: &Popup,
    level: Option<String>,
    search: Option<String>,
    pages: usize,
) -> anyhow::Result<()> {
    let logs: Vec<LogEntry> = popup.call(Request::GetLogs).await?.field("logs")?;
    let mut view = LogView::new(logs);
    if let Some(level) = level {
        view.set_level(Some(level.parse()?));
    }
    if let Some(search) = search {
        view.set_query(&search);
    }
    for _ in 1..pages.max(1) {
        view.load_more();
    }

    let visible = view.visible();
    let matched = view.filtered().len();
    println!();
    println!("📋 Logs ({} of {} matching, {} total)", visible.len(), matched, view.entries().len());
    println!();
    if visible.is_empty() {
        println!("  (no entries)");
    }
    for entry in &visible {
        print_entry(entry);
    }
    if view.has_more() {
        println!();
        println!("  … more entries, use --pages {} to load more", pages.max(1) + 1);
    }
    Ok(())
}

pub async fn add(popup: &Popup, level: &str, message: &str) -> anyhow::Result<()> {
    let level: LogLevel = level.parse()?;
    let logs: Vec<LogEntry> = popup
        .call(Request::AddLog { level, message: message.to_string() })
        .await?
        .field("logs")?;
    if let Some(entry) = logs.first() {
        print_entry(entry);
    }
    Ok(())
}

pub async fn clear(popup: &Popup) -> anyhow::Result<()> {
    let logs: Vec<LogEntry> = popup.call(Request::ClearLogs).await?.field("logs")?;
    println!("✓ Logs cleared ({} entry remaining)", logs.len());
    Ok(())
}

pub async fn export(popup: &Popup, out: Option<PathBuf>) -> anyhow::Result<()> {
    let logs: Vec<LogEntry> = popup.call(Request::GetLogs).await?.field("logs")?;
    let dir = match out {
        Some(dir) => dir,
        None => {
            let paths = Paths::default();
            paths.ensure_dirs()?;
            paths.exports_dir()
        }
    };
    let path = log_view::export(&logs, &dir)?;
    println!("✓ Exported {} entries to {}", logs.len(), path.display());
    Ok(())
}
