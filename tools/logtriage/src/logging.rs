use crate::errors::TriageError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 20 * 1024 * 1024;

static RUN_LOG: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), TriageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TriageError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| TriageError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TriageError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TriageError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| TriageError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes)?;
        }

        Ok(())
    }
}

/// Installs the process-wide run log. Later calls replace the target path.
pub fn init_run_log(path: impl AsRef<Path>) {
    let slot = RUN_LOG.get_or_init(|| Mutex::new(None));
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(JsonlLogger::new(path));
    }
}

/// Detaches the process-wide run log; later appends are no-ops.
pub fn close_run_log() {
    if let Some(slot) = RUN_LOG.get() {
        if let Ok(mut guard) = slot.lock() {
            *guard = None;
        }
    }
}

/// Best-effort append to the run log; a no-op until `init_run_log` is called.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Some(slot) = RUN_LOG.get() else {
        return;
    };
    let Ok(guard) = slot.lock() else {
        return;
    };
    if let Some(logger) = guard.as_ref() {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
