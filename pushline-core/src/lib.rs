//! Core library for the Pushline notification delivery service.
//!
//! Three subsystems live here:
//!
//! - [`store`]: the durable notification store over PostgreSQL. Sole keeper
//!   of the notification lifecycle; claims are coordinated across replicas
//!   with row-level `FOR UPDATE SKIP LOCKED`, no external lock service.
//! - [`ingest`]: the log-bus consumer that batches incoming events into
//!   transactional inserts, committing offsets only after durable persist.
//! - [`scheduler`] and [`registry`]: the claim/deliver/acknowledge worker
//!   pools and the per-user fan-out map feeding live push channels.
#![allow(missing_docs)]

pub mod error;
pub mod ingest;
pub mod registry;
pub mod scheduler;
pub mod store;

/// Embedded schema migrations. `PostgresStore::initialize_schema` runs
/// these at startup and `#[sqlx::test(migrator = ...)]` applies them to
/// each ephemeral test database.
pub static MIGRATOR: sqlx::migrate::Migrator =
    sqlx::migrate!("./migrations");

pub use error::{CoreError, Result};
pub use ingest::{IngestConfig, Ingestor};
pub use registry::{Registry, RegistryConfig, Sink};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{
    InsertOutcome, NotificationStore, PostgresStore, SweepOutcome,
};
