use crate::error::ModelError;
use std::str::FromStr;

/// Ordered delivery priority. Lower rank is claimed first, so
/// `High < Medium < Low` under the derived ordering.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Persisted rank; the claim index orders on this column ascending.
    pub fn rank(self) -> i16 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn from_rank(rank: i16) -> Result<Self, ModelError> {
        match rank {
            0 => Ok(Priority::High),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::Low),
            other => Err(ModelError::InvalidPriority(format!(
                "unknown priority rank {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl FromStr for Priority {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            other => {
                Err(ModelError::InvalidPriority(other.to_string()))
            }
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known notification kinds. The kind string drives client-side rendering
/// and determines the delivery priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    JobNew,
    JobUpdate,
    JobApplicationStatus,
    ConnectionRequest,
    ConnectionAccepted,
    JobApplicationViewed,
    FollowerNew,
    FollowerContentLiked,
    FollowerContentCommented,
    ConnectionEndorsed,
    /// Kind this deployment does not recognize; carried through verbatim.
    Other(String),
}

impl EventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "job.new" => EventKind::JobNew,
            "job.update" => EventKind::JobUpdate,
            "job.application_status" => EventKind::JobApplicationStatus,
            "connection.request" => EventKind::ConnectionRequest,
            "connection.accepted" => EventKind::ConnectionAccepted,
            "job.application_viewed" => EventKind::JobApplicationViewed,
            "follower.new" => EventKind::FollowerNew,
            "follower.content_liked" => EventKind::FollowerContentLiked,
            "follower.content_commented" => {
                EventKind::FollowerContentCommented
            }
            "connection.endorsed" => EventKind::ConnectionEndorsed,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::JobNew => "job.new",
            EventKind::JobUpdate => "job.update",
            EventKind::JobApplicationStatus => "job.application_status",
            EventKind::ConnectionRequest => "connection.request",
            EventKind::ConnectionAccepted => "connection.accepted",
            EventKind::JobApplicationViewed => "job.application_viewed",
            EventKind::FollowerNew => "follower.new",
            EventKind::FollowerContentLiked => "follower.content_liked",
            EventKind::FollowerContentCommented => {
                "follower.content_commented"
            }
            EventKind::ConnectionEndorsed => "connection.endorsed",
            EventKind::Other(s) => s,
        }
    }

    /// Delivery priority for this kind. Unknown kinds default to MEDIUM.
    pub fn priority(&self) -> Priority {
        match self {
            EventKind::JobNew
            | EventKind::JobUpdate
            | EventKind::JobApplicationStatus => Priority::High,
            EventKind::ConnectionRequest
            | EventKind::ConnectionAccepted
            | EventKind::JobApplicationViewed => Priority::Medium,
            EventKind::FollowerNew
            | EventKind::FollowerContentLiked
            | EventKind::FollowerContentCommented
            | EventKind::ConnectionEndorsed => Priority::Low,
            EventKind::Other(_) => Priority::Medium,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority for a raw `event_type` string off the bus.
pub fn priority_for_event_type(event_type: &str) -> Priority {
    EventKind::parse(event_type).priority()
}
