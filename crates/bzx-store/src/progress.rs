use std::io::{self, IsTerminal, Write};

const MEGABYTE: u64 = 1024 * 1024;

/// Explicit setting wins; otherwise progress is shown when stdout is a terminal.
#[must_use]
pub fn progress_enabled(setting: Option<bool>) -> bool {
    setting.unwrap_or_else(|| io::stdout().is_terminal())
}

/// Single-line download meter rewritten in place on stdout.
pub(crate) struct DownloadProgress {
    label: String,
    total: Option<u64>,
    current: u64,
    last_line: String,
    enabled: bool,
}

impl DownloadProgress {
    pub(crate) fn new(label: impl Into<String>, total: Option<u64>, enabled: bool) -> Self {
        Self {
            label: label.into(),
            total,
            current: 0,
            last_line: String::new(),
            enabled,
        }
    }

    pub(crate) fn advance(&mut self, bytes: u64) {
        self.current = self.current.saturating_add(bytes);
        if !self.enabled {
            return;
        }
        let line = format_progress(&self.label, self.current, self.total);
        if line == self.last_line {
            return;
        }
        let mut stdout = io::stdout();
        let _ = write!(stdout, "\r{line}");
        let _ = stdout.flush();
        self.last_line = line;
    }
}

impl Drop for DownloadProgress {
    fn drop(&mut self) {
        if self.enabled && !self.last_line.is_empty() {
            println!();
        }
    }
}

pub(crate) fn format_progress(label: &str, current: u64, total: Option<u64>) -> String {
    let current_mb = current / MEGABYTE;
    match total {
        Some(total) if total > 0 => {
            let percent = current.min(total) * 100 / total;
            format!(
                "{label}: {current_mb} MB out of {} MB ({percent}%)",
                total / MEGABYTE
            )
        }
        _ => format!("{label}: {current_mb} MB"),
    }
}
