// src/utils/log.rs

//! Console progress output with server-style formatting.
//!
//! Diagnostics go through the `log` facade; this module renders the
//! operator-facing progress of a sync run (steps, batches, summaries) with
//! timestamps and levels.

use std::sync::OnceLock;

use chrono::Local;

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Current console level
static LOG_LEVEL: OnceLock<LogLevel> = OnceLock::new();

/// Set the console level. Only the first call takes effect.
pub fn init(level: LogLevel) {
    let _ = LOG_LEVEL.set(level);
}

fn should_log(level: LogLevel) -> bool {
    let current = LOG_LEVEL.get().copied().unwrap_or(LogLevel::Info);
    level >= current
}

/// Format a line with timestamp and level
fn format_log(level: LogLevel, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("[{}] [{}] {}", timestamp, level.as_str(), message)
}

pub fn info(message: &str) {
    if should_log(LogLevel::Info) {
        println!("{}", format_log(LogLevel::Info, message));
    }
}

/// Log a success message (always shown)
pub fn success(message: &str) {
    println!("{}", format_log(LogLevel::Info, message));
}

/// Per-chunk progress, only shown at debug level
pub fn progress(message: &str) {
    if should_log(LogLevel::Debug) {
        println!("{}", format_log(LogLevel::Debug, message));
    }
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    if should_log(LogLevel::Info) {
        let msg = format!("[STEP {}/{}] {}", step_num, total, message);
        println!("{}", format_log(LogLevel::Info, &msg));
    }
}

pub fn header(title: &str) {
    if should_log(LogLevel::Info) {
        let border = "═".repeat(60);
        println!("{}", format_log(LogLevel::Info, &border));
        println!("{}", format_log(LogLevel::Info, &format!("  {}", title)));
        println!("{}", format_log(LogLevel::Info, &border));
    }
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    if should_log(LogLevel::Info) {
        let msg = format!("    {}", message);
        println!("{}", format_log(LogLevel::Info, &msg));
    }
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    if should_log(LogLevel::Info) {
        println!();
        println!(
            "{}",
            format_log(LogLevel::Info, &format!("[SUMMARY] {}", title))
        );
        for (key, value) in items {
            let item_msg = format!("    {}: {}", key, value);
            println!("{}", format_log(LogLevel::Info, &item_msg));
        }
    }
}

/// Log a failure summary to stderr (always shown)
pub fn failure(title: &str, items: &[(&str, String)]) {
    eprintln!();
    eprintln!(
        "{}",
        format_log(LogLevel::Error, &format!("[FAILED] {}", title))
    );
    for (key, value) in items {
        let item_msg = format!("    {}: {}", key, value);
        eprintln!("{}", format_log(LogLevel::Error, &item_msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("TRACE"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_format_carries_level() {
        let line = format_log(LogLevel::Warn, "manifest missing");
        assert!(line.ends_with("[WARN] manifest missing"));
    }
}
