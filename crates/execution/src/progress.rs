//! Progress events.
//!
//! Emitters are fire-and-forget: strategies never wait on them and their
//! absence never changes an execution outcome.

use serde_json::Value;
use std::sync::Mutex;
use tracing::debug;

/// Receives progress events from strategies.
pub trait ProgressEmitter: Send + Sync {
    /// Named event.
    fn custom(&self, _event: &str, _payload: Value) {}

    /// A task started.
    fn started(&self, _payload: Value) {}

    /// A task completed.
    fn completed(&self, _payload: Value) {}

    /// A task failed.
    fn failed(&self, _payload: Value) {}

    /// Batch progress in percent.
    fn progress(&self, _percent: f64, _detail: Value) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressEmitter for NoopProgress {}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressEmitter for TracingProgress {
    fn custom(&self, event: &str, payload: Value) {
        debug!(event, %payload, "progress event");
    }

    fn started(&self, payload: Value) {
        debug!(%payload, "task started");
    }

    fn completed(&self, payload: Value) {
        debug!(%payload, "task completed");
    }

    fn failed(&self, payload: Value) {
        debug!(%payload, "task failed");
    }

    fn progress(&self, percent: f64, detail: Value) {
        debug!(percent, %detail, "progress");
    }
}

/// A recorded progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Event name (`started`, `completed`, `failed`, `progress` or a custom name)
    pub name: String,
    /// Payload
    pub payload: Value,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Names of the events recorded so far.
    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    fn record(&self, name: &str, payload: Value) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProgressEvent {
                name: name.to_string(),
                payload,
            });
    }
}

impl ProgressEmitter for RecordingProgress {
    fn custom(&self, event: &str, payload: Value) {
        self.record(event, payload);
    }

    fn started(&self, payload: Value) {
        self.record("started", payload);
    }

    fn completed(&self, payload: Value) {
        self.record("completed", payload);
    }

    fn failed(&self, payload: Value) {
        self.record("failed", payload);
    }

    fn progress(&self, percent: f64, detail: Value) {
        self.record("progress", serde_json::json!({ "percent": percent, "detail": detail }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recording_progress_keeps_order() {
        let progress = RecordingProgress::new();
        progress.started(json!({"taskId": "t"}));
        progress.progress(50.0, json!({"completed": 1}));
        progress.custom("decomposition.parse_fallback", json!({}));
        progress.completed(json!({"taskId": "t"}));

        assert_eq!(
            progress.names(),
            vec!["started", "progress", "decomposition.parse_fallback", "completed"]
        );
        assert_eq!(progress.events()[1].payload["percent"], 50.0);
    }

    #[test]
    fn test_noop_accepts_everything() {
        let progress: &dyn ProgressEmitter = &NoopProgress;
        progress.failed(json!({"error": "x"}));
        progress.progress(10.0, Value::Null);
    }
}
