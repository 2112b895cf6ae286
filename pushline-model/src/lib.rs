//! Core data model definitions shared across Pushline crates.
#![allow(missing_docs)]

pub mod error;
pub mod frame;
pub mod ids;
pub mod notification;
pub mod priority;
pub mod wire;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use frame::Frame;
pub use ids::{NotificationId, SinkId, UserId};
pub use notification::{
    ClaimedNotification, Notification, NotificationStatus, StatusUpdate,
};
pub use priority::{EventKind, Priority};
pub use wire::{BusEvent, BusEventMetadata};
