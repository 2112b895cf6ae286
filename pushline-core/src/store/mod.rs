//! Durable notification state and its transitions.
//!
//! All mutation goes through the four [`NotificationStore`] operations; no
//! caller issues row updates on its own. The claim operation is the only
//! cross-replica coordination point in the system and relies on the
//! backing store's skip-locked row selection.

mod postgres;

pub use postgres::PostgresStore;

use crate::error::Result;
use async_trait::async_trait;
use pushline_model::{
    ClaimedNotification, Notification, StatusUpdate, UserId,
};

/// Outcome of a batch insert. Duplicate ids are soft errors: logged,
/// skipped, and counted here while the rest of the batch commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Outcome of one lease-expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Rows returned to `pending` with an incremented retry count.
    pub reverted: u64,
    /// Rows moved to terminal `failed` because the retry cap was reached.
    pub exhausted: u64,
}

impl SweepOutcome {
    pub fn total(&self) -> u64 {
        self.reverted + self.exhausted
    }
}

/// Transactional store holding one row per notification.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Atomically insert a batch of `pending` rows. An empty batch is a
    /// no-op. A duplicate id is logged and skipped without failing the
    /// rest of the batch.
    async fn insert_batch(
        &self,
        rows: &[Notification],
    ) -> Result<InsertOutcome>;

    /// Claim up to `max_n` pending rows for `owner_id` under a lease of
    /// `lease_ms` milliseconds. Ordered by priority rank, then insertion
    /// time. Concurrent claimers never receive overlapping rows. Only
    /// `pending` rows are touched; expired leases are the sweeper's job.
    async fn claim_batch(
        &self,
        owner_id: &str,
        lease_ms: i64,
        max_n: usize,
    ) -> Result<Vec<ClaimedNotification>>;

    /// Apply delivery outcomes in one transaction. Each update is
    /// conditional on the row still being `claimed`; a row swept out from
    /// under us is skipped silently. Returns the number applied.
    async fn update_status_batch(
        &self,
        updates: &[StatusUpdate],
    ) -> Result<usize>;

    /// Revert every `claimed` row whose lease deadline has passed back to
    /// `pending`, or to terminal `failed` once `max_retries` is exhausted.
    async fn reclaim_expired(
        &self,
        max_retries: i32,
    ) -> Result<SweepOutcome>;

    /// Most recent rows for one user, newest first, for the reconnect
    /// history endpoint.
    async fn recent_for_user(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<Notification>>;
}
