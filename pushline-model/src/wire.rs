use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Producer-side envelope for one event on the log bus.
///
/// Messages are JSON-encoded and partitioned by `user_id`, so a single
/// user's events arrive in order on one partition.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BusEvent {
    pub event_id: String,
    pub event_type: String,
    /// Producer's suggested priority. The ingestor derives the effective
    /// priority from `event_type`; this field is informational.
    #[serde(default)]
    pub priority: Option<String>,
    pub user_id: String,
    pub event_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: HashMap<String, String>,
    #[serde(default)]
    pub metadata: Option<BusEventMetadata>,
}

/// Trace context attached by the producing service.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BusEventMetadata {
    #[serde(default)]
    pub source_service: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
}
