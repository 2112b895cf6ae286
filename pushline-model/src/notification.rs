use crate::error::ModelError;
use crate::ids::{NotificationId, UserId};
use crate::priority::Priority;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;

/// Authoritative lifecycle state of a notification row.
///
/// `Pending` rows are claimable; `Claimed` rows carry an owner and a lease
/// deadline and revert to `Pending` when the lease expires with retries
/// remaining; `Pushed` and `Failed` are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Claimed,
    Pushed,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Claimed => "claimed",
            NotificationStatus::Pushed => "pushed",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "claimed" => Ok(NotificationStatus::Claimed),
            "pushed" => Ok(NotificationStatus::Pushed),
            "failed" => Ok(NotificationStatus::Failed),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One addressable message destined for one user. Mirrors the store row.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub event_type: String,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub payload: HashMap<String, String>,
    pub event_ts: DateTime<Utc>,
    pub received_ts: DateTime<Utc>,
    pub delivered_ts: Option<DateTime<Utc>>,
    pub owner_id: Option<String>,
    pub lease_deadline: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_ts: DateTime<Utc>,
}

/// Minimum projection a delivery worker needs to fan a row out.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClaimedNotification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub event_type: String,
    pub priority: Priority,
    pub payload: HashMap<String, String>,
    pub event_ts: DateTime<Utc>,
    pub received_ts: DateTime<Utc>,
}

/// Delivery outcome flowing from the delivery workers to the status flusher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub id: NotificationId,
    pub status: NotificationStatus,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn pushed(id: NotificationId) -> Self {
        StatusUpdate {
            id,
            status: NotificationStatus::Pushed,
            error: None,
        }
    }

    pub fn failed(id: NotificationId, error: impl Into<String>) -> Self {
        StatusUpdate {
            id,
            status: NotificationStatus::Failed,
            error: Some(error.into()),
        }
    }
}
