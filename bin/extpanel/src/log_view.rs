use extpanel_core::{LogEntry, LogLevel};
use std::path::{Path, PathBuf};

pub const PAGE_SIZE: usize = 5;

/// Popup-local projection of the log sequence: a filter plus a display
/// window. Changing the filter resets the window to one page.
#[derive(Debug, Clone)]
pub struct LogView {
    entries: Vec<LogEntry>,
    level: Option<LogLevel>,
    query: String,
    window: usize,
}

impl LogView {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            level: None,
            query: String::new(),
            window: PAGE_SIZE,
        }
    }

    pub fn set_level(&mut self, level: Option<LogLevel>) {
        self.level = level;
        self.window = PAGE_SIZE;
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.trim().to_lowercase();
        self.window = PAGE_SIZE;
    }

    pub fn load_more(&mut self) {
        self.window += PAGE_SIZE;
    }

    pub fn filtered(&self) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| self.level.map_or(true, |l| e.level == l))
            .filter(|e| {
                self.query.is_empty()
                    || e.message.to_lowercase().contains(&self.query)
                    || e.timestamp.to_lowercase().contains(&self.query)
            })
            .collect()
    }

    /// The entries currently on screen.
    pub fn visible(&self) -> Vec<&LogEntry> {
        self.filtered().into_iter().take(self.window).collect()
    }

    pub fn has_more(&self) -> bool {
        self.filtered().len() > self.window
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}

pub fn export_file_name(date: chrono::NaiveDate) -> String {
    format!("extension-logs-{}.json", date.format("%Y-%m-%d"))
}

/// Write the full log sequence, pretty-printed, into `dir`.
pub fn export(entries: &[LogEntry], dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(chrono::Utc::now().date_naive()));
    std::fs::write(&path, serde_json::to_string_pretty(entries)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(level: LogLevel, message: &str, ts: &str) -> LogEntry {
        LogEntry::new(level, message, ts)
    }

    fn sample() -> Vec<LogEntry> {
        vec![
            entry(LogLevel::Error, "Field not found: telephone1", "2024-03-02 10:00:02"),
            entry(LogLevel::Warning, "Dynamics CRM not detected", "2024-03-02 10:00:01"),
            entry(LogLevel::Info, "Background service started", "2024-03-01 09:00:00"),
        ]
    }

    #[test]
    fn test_filter_by_level() {
        let mut view = LogView::new(sample());
        view.set_level(Some("error".parse().unwrap()));
        let visible = view.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].level, LogLevel::Error);
    }

    #[test]
    fn test_search_message_and_timestamp_case_insensitive() {
        let mut view = LogView::new(sample());
        view.set_query("CRM");
        assert_eq!(view.filtered().len(), 1);

        view.set_query("2024-03-02");
        assert_eq!(view.filtered().len(), 2);

        view.set_level(Some(LogLevel::Info));
        assert!(view.filtered().is_empty());
    }

    #[test]
    fn test_window_and_load_more() {
        let entries: Vec<LogEntry> = (0..12)
            .map(|i| entry(LogLevel::Info, &format!("m{}", i), "2024-01-01 00:00:00"))
            .collect();
        let mut view = LogView::new(entries);
        assert_eq!(view.visible().len(), 5);
        assert!(view.has_more());

        view.load_more();
        assert_eq!(view.visible().len(), 10);
        view.load_more();
        assert_eq!(view.visible().len(), 12);
        assert!(!view.has_more());

        view.set_query("m1");
        assert_eq!(view.filtered().len(), 3);
        assert_eq!(view.visible().len(), 3);
    }

    #[test]
    fn test_filter_change_resets_window() {
        let entries: Vec<LogEntry> = (0..8)
            .map(|i| entry(LogLevel::Info, &format!("m{}", i), "2024-01-01 00:00:00"))
            .collect();
        let mut view = LogView::new(entries);
        view.load_more();
        assert_eq!(view.visible().len(), 8);
        view.set_level(Some(LogLevel::Info));
        assert_eq!(view.visible().len(), 5);
    }

    #[test]
    fn test_export_writes_full_sequence() {
        let dir = TempDir::new().unwrap();
        let path = export(&sample(), dir.path()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("extension-logs-"));
        assert!(name.ends_with(".json"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains('\n'));
        let parsed: Vec<LogEntry> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_export_file_name() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 5, 9).unwrap();
        assert_eq!(export_file_name(date), "extension-logs-2024-05-09.json");
    }
}
