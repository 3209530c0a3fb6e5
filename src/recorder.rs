//! Durable log of per-block processing exceptions.
//!
//! Fire-and-forget contract: recording must never raise back into the
//! pipeline. Implementations that persist elsewhere swallow their own IO
//! failures.

use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionEntry {
    pub block_number: Option<u64>,
    pub dataclass: String,
    pub level: Level,
    pub message_type: String,
    pub message: String,
    pub context: Value,
}

pub trait ExceptionRecorder: Send + Sync {
    fn record(
        &self,
        block_number: Option<u64>,
        dataclass: &str,
        level: Level,
        message_type: &str,
        message: &str,
        context: Value,
    );
}

/// Emits exception records as structured tracing events.
pub struct TracingRecorder;

impl ExceptionRecorder for TracingRecorder {
    fn record(
        &self,
        block_number: Option<u64>,
        dataclass: &str,
        level: Level,
        message_type: &str,
        message: &str,
        context: Value,
    ) {
        match level {
            Level::Warn => tracing::warn!(
                block_number,
                dataclass,
                message_type,
                %context,
                "{message}"
            ),
            Level::Error => tracing::error!(
                block_number,
                dataclass,
                message_type,
                %context,
                "{message}"
            ),
        }
    }
}

/// Collects exception records in memory, for tests and replay tooling.
#[derive(Default)]
pub struct MemoryRecorder {
    entries: Mutex<Vec<ExceptionEntry>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ExceptionEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ExceptionRecorder for MemoryRecorder {
    fn record(
        &self,
        block_number: Option<u64>,
        dataclass: &str,
        level: Level,
        message_type: &str,
        message: &str,
        context: Value,
    ) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ExceptionEntry {
                block_number,
                dataclass: dataclass.to_string(),
                level,
                message_type: message_type.to_string(),
                message: message.to_string(),
                context,
            });
    }
}
