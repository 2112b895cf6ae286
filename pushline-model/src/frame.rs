use crate::ids::NotificationId;
use crate::notification::ClaimedNotification;
use crate::priority::Priority;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One outbound push-channel frame.
///
/// The edge serializes these as server-sent events: the variant name is the
/// SSE `event:` field and [`Frame::data`] is the `data:` body.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
pub enum Frame {
    Connected,
    Notification(NotificationFrame),
    Heartbeat { timestamp: DateTime<Utc> },
}

/// Client-facing body of a `notification` frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NotificationFrame {
    pub id: NotificationId,
    pub event_type: String,
    pub priority: Priority,
    pub event_ts: DateTime<Utc>,
    pub payload: HashMap<String, String>,
}

impl Frame {
    pub fn notification(claimed: &ClaimedNotification) -> Self {
        Frame::Notification(NotificationFrame {
            id: claimed.id,
            event_type: claimed.event_type.clone(),
            priority: claimed.priority,
            event_ts: claimed.event_ts,
            payload: claimed.payload.clone(),
        })
    }

    pub fn heartbeat(now: DateTime<Utc>) -> Self {
        Frame::Heartbeat { timestamp: now }
    }

    /// SSE `event:` field for this frame.
    pub fn event_name(&self) -> &'static str {
        match self {
            Frame::Connected => "connected",
            Frame::Notification(_) => "notification",
            Frame::Heartbeat { .. } => "heartbeat",
        }
    }

    /// SSE `data:` body for this frame.
    pub fn data(&self) -> serde_json::Value {
        match self {
            Frame::Connected => {
                serde_json::json!({"status": "connected"})
            }
            Frame::Notification(body) => {
                serde_json::to_value(body).unwrap_or_else(|_| {
                    serde_json::json!({"error": "unencodable frame"})
                })
            }
            Frame::Heartbeat { timestamp } => serde_json::json!({
                "timestamp": timestamp.to_rfc3339(),
            }),
        }
    }
}
