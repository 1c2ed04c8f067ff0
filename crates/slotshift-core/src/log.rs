//! Operator-facing execution log.
//!
//! Rollout steps report progress through an [`ExecutionLog`] passed in by the
//! caller, separate from the `tracing` diagnostics every crate emits. The
//! log is append-only and ordered.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

/// Append-only sink for human-readable progress lines.
pub trait ExecutionLog: Send + Sync {
    fn append(&self, level: LogLevel, message: &str);

    fn info(&self, message: &str) {
        self.append(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.append(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.append(LogLevel::Error, message);
    }
}

/// Forwards lines to `tracing` under the `slotshift::execution` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl ExecutionLog for TracingLog {
    fn append(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "slotshift::execution", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "slotshift::execution", "{message}"),
            LogLevel::Error => tracing::error!(target: "slotshift::execution", "{message}"),
        }
    }
}

/// Keeps lines in memory, in append order.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().expect("log lock").clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|l| l.message).collect()
    }

    /// Whether any line at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|l| l.level == level && l.message.contains(needle))
    }
}

impl ExecutionLog for MemoryLog {
    fn append(&self, level: LogLevel, message: &str) {
        self.lines
            .lock()
            .expect("log lock")
            .push(LogLine {
                level,
                message: message.to_string(),
            });
        tracing::debug!(target: "slotshift::execution", %level, "{message}");
    }
}
