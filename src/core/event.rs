use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A committed, immutable record in the event log. Versioning and
/// positioning are assigned by the store at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub realm_id: String,
    pub stream_id: String,
    pub version: u64,
    pub global_position: i64,
    pub event_type: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// A prospective event submitted to `append`. Absent metadata is
/// persisted as a distinguished null, not as an empty document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub event_type: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl EventData {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
