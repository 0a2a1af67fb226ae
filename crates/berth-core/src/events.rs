use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

/// A lifecycle notification, e.g. `container-snapshot-created` on
/// `/1.0/containers/web`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LifecycleEvent {
    pub event: String,
    pub resource: String,
    pub payload: Value,
}

/// Receives lifecycle notifications. Fire and forget.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, resource: &str, payload: Value);
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &str, resource: &str, payload: Value) {
        info!("event {event} on {resource}: {payload}");
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &str, resource: &str, payload: Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push(LifecycleEvent {
                event: event.to_owned(),
                resource: resource.to_owned(),
                payload,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemoryEventSink::new();
        sink.emit("a", "/1.0/containers/web", Value::Null);
        sink.emit(
            "b",
            "/1.0/containers/web",
            serde_json::json!({"snapshot_name": "web/snap0"}),
        );
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "a");
        assert_eq!(events[1].payload["snapshot_name"], "web/snap0");
    }
}
