//! Structured JSON logger
//!
//! - One log line = one JSON object = one event
//! - `event` and `severity` are always present; other keys are sorted
//! - Synchronous, written to stderr in a single write
//! - Events below the process-wide minimum severity are dropped
//!
//! The minimum severity defaults to INFO and is read once from
//! `DOCSTORE_LOG` (`trace`, `info`, `warn`, `error`, `off`).

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use serde_json::{Map, Value};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-record or per-block detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    fn parse_filter(raw: &str) -> u8 {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Severity::Trace as u8,
            "warn" | "warning" => Severity::Warn as u8,
            "error" => Severity::Error as u8,
            "off" | "none" => LOG_OFF,
            _ => Severity::Info as u8,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const LOG_OFF: u8 = u8::MAX;
const UNSET: u8 = u8::MAX - 1;

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(UNSET);
static ENV_FILTER: OnceLock<u8> = OnceLock::new();

fn min_severity() -> u8 {
    match MIN_SEVERITY.load(Ordering::Relaxed) {
        UNSET => *ENV_FILTER.get_or_init(|| {
            std::env::var("DOCSTORE_LOG")
                .map(|v| Severity::parse_filter(&v))
                .unwrap_or(Severity::Info as u8)
        }),
        level => level,
    }
}

/// Structured logger writing JSON lines to stderr
pub struct Logger;

impl Logger {
    /// Overrides the minimum severity for the whole process
    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    /// Suppresses all log output
    pub fn disable() {
        MIN_SEVERITY.store(LOG_OFF, Ordering::Relaxed);
    }

    /// Whether events of `severity` are currently emitted
    pub fn enabled(severity: Severity) -> bool {
        let min = min_severity();
        min != LOG_OFF && severity as u8 >= min
    }

    /// Log an event with the given severity and fields
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if Self::enabled(severity) {
            Self::log_to_writer(severity, event, fields, &mut io::stderr());
        }
    }

    fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        // serde_json's default map is ordered, so output is deterministic
        let mut object = Map::new();
        for (key, value) in fields {
            object.insert((*key).to_string(), Value::String((*value).to_string()));
        }
        object.insert("event".to_string(), Value::String(event.to_string()));
        object.insert("severity".to_string(), Value::String(severity.as_str().to_string()));

        let mut line = Value::Object(object).to_string();
        line.push('\n');
        line
    }

    fn log_to_writer<W: Write>(
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        let line = Self::render(severity, event, fields);
        // Logging never fails the operation being logged
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }

    /// Log at TRACE level
    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    /// Log at INFO level
    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    /// Log at WARN level
    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    /// Log at ERROR level
    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }
}

/// Capture a log line for testing
#[cfg(test)]
pub fn capture_log(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut buffer = Vec::new();
    Logger::log_to_writer(severity, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}
