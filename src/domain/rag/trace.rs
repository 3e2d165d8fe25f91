use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One step recorded while a strategy runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTraceEntry {
    pub timestamp_utc: DateTime<Utc>,
    pub step: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// Append-only trace buffer for a single strategy invocation
#[derive(Debug, Default)]
pub struct TraceRecorder {
    entries: Mutex<Vec<ExecutionTraceEntry>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, step: &str, message: impl Into<String>) {
        self.log_details(step, message, Value::Null);
    }

    pub fn log_details(&self, step: &str, message: impl Into<String>, details: Value) {
        let message = message.into();
        debug!(step = step, "{}", message);

        self.lock().push(ExecutionTraceEntry {
            timestamp_utc: Utc::now(),
            step: step.to_string(),
            message,
            details,
        });
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<ExecutionTraceEntry> {
        self.lock().clone()
    }

    pub fn take(&self) -> Vec<ExecutionTraceEntry> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ExecutionTraceEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_emission_order() {
        let recorder = TraceRecorder::new();
        recorder.log("init", "start");
        recorder.log_details("retrieve_end", "3 units", serde_json::json!({"count": 3}));
        recorder.log("complete", "done");

        let steps: Vec<_> = recorder.snapshot().into_iter().map(|e| e.step).collect();
        assert_eq!(steps, vec!["init", "retrieve_end", "complete"]);

        let entries = recorder.snapshot();
        assert!(entries[0].timestamp_utc <= entries[2].timestamp_utc);
        assert_eq!(entries[1].details["count"], 3);
    }

    #[test]
    fn test_take_drains_buffer() {
        let recorder = TraceRecorder::new();
        recorder.log("init", "start");

        assert_eq!(recorder.take().len(), 1);
        assert!(recorder.is_empty());
    }
}
