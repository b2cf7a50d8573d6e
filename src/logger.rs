// Unified logger: writes through the `log` facade AND persists to a daily file
//
// Usage (no handle needed):
//      ulog_info!("[stream] Started pid {}", pid);
//      ulog_warn!("[alist] Timeout: {}", err);
//
// Features:
// - Forwards to `log` (env_logger prints to stderr)
// - Persists to <root>/logs/bot-{YYYY-MM-DD}.log
// - The logs menu tails the same file

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Logs directory, set once at startup via `init_logs_dir`.
static LOGS_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Point the file logger at `<root>/logs`. Call once during startup.
pub fn init_logs_dir(root: &Path) {
    if LOGS_DIR.set(root.join("logs")).is_err() {
        log::warn!("Logs directory already initialized");
    }
}

/// Get logs directory path (falls back to ~/.termux-bot/logs before init)
fn get_logs_dir() -> PathBuf {
    LOGS_DIR
        .get()
        .cloned()
        .unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(".termux-bot").join("logs")
        })
}

/// Get today's log file path
pub fn get_log_file_path() -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    get_logs_dir().join(format!("bot-{}.log", today))
}

/// Append a line to today's log file
fn persist_log(level: LogLevel, message: &str) {
    let logs_dir = get_logs_dir();
    if let Err(e) = fs::create_dir_all(&logs_dir) {
        log::error!("Failed to create logs directory: {}", e);
        return;
    }

    let line = format_line(&chrono::Local::now().to_rfc3339(), level, message);

    match OpenOptions::new().create(true).append(true).open(get_log_file_path()) {
        Ok(mut file) => {
            if let Err(e) = file.write_all(line.as_bytes()) {
                log::error!("Failed to write to log file: {}", e);
            }
        }
        Err(e) => {
            log::error!("Failed to open log file: {}", e);
        }
    }
}

fn format_line(timestamp: &str, level: LogLevel, message: &str) -> String {
    format!("{} [{}] {}\n", timestamp, level.as_str(), message)
}

/// Log to stdout/stderr via `log` and persist to the daily file.
/// Debug lines are only persisted when debug logging is enabled.
pub fn unified_log(level: LogLevel, message: String) {
    match level {
        LogLevel::Info => log::info!("{}", message),
        LogLevel::Warn => log::warn!("{}", message),
        LogLevel::Error => log::error!("{}", message),
        LogLevel::Debug => log::debug!("{}", message),
    }
    if level != LogLevel::Debug || log::log_enabled!(log::Level::Debug) {
        persist_log(level, &message);
    }
}

/// Last `lines` lines of today's log file, or `None` if nothing was logged yet.
pub fn tail_log(lines: usize) -> Option<String> {
    let content = fs::read_to_string(get_log_file_path()).ok()?;
    Some(tail_lines(&content, lines))
}

fn tail_lines(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Global unified log macros.
/// Usage: ulog_info!("[module] message {}", arg);
#[macro_export]
macro_rules! ulog_info {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Info, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_warn {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Warn, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_error {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Error, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_debug {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Debug, format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_lines() {
        let content = "a\nb\nc\nd";
        assert_eq!(tail_lines(content, 2), "c\nd");
        assert_eq!(tail_lines(content, 10), "a\nb\nc\nd");
        assert_eq!(tail_lines("", 3), "");
    }

    #[test]
    fn test_format_line() {
        let line = format_line("2026-01-01T00:00:00+00:00", LogLevel::Warn, "[stream] gone");
        assert_eq!(line, "2026-01-01T00:00:00+00:00 [WARN ] [stream] gone\n");
    }
}
