//! Event sinks - write-only destinations for thinking events

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

use super::ThinkingEvent;

/// Write-only destination for thinking events
///
/// Emission is fire-and-forget: sink failures are logged, never surfaced.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ThinkingEvent);
}

/// Discards every event (default)
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ThinkingEvent) {}
}

/// Appends events as JSON lines to a file
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: ThinkingEvent) {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                let line = serde_json::to_string(&event).unwrap_or_default();
                writeln!(file, "{}", line)
            });
        if let Err(e) = result {
            warn!("Failed to emit thinking event: {}", e);
        }
    }
}
