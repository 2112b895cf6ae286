//! In-memory `NotificationStore` double for scheduler tests, mirroring
//! the PostgreSQL transition semantics without a live database.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use pushline_core::error::Result;
use pushline_core::store::{
    InsertOutcome, NotificationStore, SweepOutcome,
};
use pushline_model::{
    ClaimedNotification, Notification, NotificationId, NotificationStatus,
    Priority, StatusUpdate, UserId,
};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<NotificationId, Notification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, id: NotificationId) -> Option<Notification> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn status_of(
        &self,
        id: NotificationId,
    ) -> Option<NotificationStatus> {
        self.row(id).map(|row| row.status)
    }

    pub fn seed_pending(
        &self,
        user: &str,
        event_type: &str,
        priority: Priority,
    ) -> NotificationId {
        let now = Utc::now();
        let row = Notification {
            id: NotificationId::new(),
            user_id: UserId::new(user),
            event_type: event_type.to_string(),
            priority,
            status: NotificationStatus::Pending,
            payload: HashMap::from([(
                "seq".to_string(),
                event_type.to_string(),
            )]),
            event_ts: now,
            received_ts: now,
            delivered_ts: None,
            owner_id: None,
            lease_deadline: None,
            retry_count: 0,
            last_error: None,
            created_ts: now,
        };
        let id = row.id;
        self.rows.lock().unwrap().insert(id, row);
        id
    }

    /// Seed a row already claimed by another owner with an expired lease,
    /// as if a replica died mid-delivery.
    pub fn seed_orphaned_claim(
        &self,
        user: &str,
        dead_owner: &str,
        retry_count: i32,
    ) -> NotificationId {
        let id = self.seed_pending(user, "job.new", Priority::High);
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).unwrap();
        row.status = NotificationStatus::Claimed;
        row.owner_id = Some(dead_owner.to_string());
        row.retry_count = retry_count;
        row.lease_deadline =
            Some(Utc::now() - ChronoDuration::seconds(60));
        id
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_batch(
        &self,
        rows: &[Notification],
    ) -> Result<InsertOutcome> {
        let mut map = self.rows.lock().unwrap();
        let mut outcome = InsertOutcome::default();
        for row in rows {
            if map.contains_key(&row.id) {
                outcome.duplicates += 1;
            } else {
                map.insert(row.id, row.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn claim_batch(
        &self,
        owner_id: &str,
        lease_ms: i64,
        max_n: usize,
    ) -> Result<Vec<ClaimedNotification>> {
        let mut map = self.rows.lock().unwrap();
        let mut candidates: Vec<NotificationId> = map
            .values()
            .filter(|row| row.status == NotificationStatus::Pending)
            .map(|row| row.id)
            .collect();
        candidates.sort_by_key(|id| {
            let row = &map[id];
            (row.priority.rank(), row.created_ts)
        });
        candidates.truncate(max_n);

        let deadline =
            Utc::now() + ChronoDuration::milliseconds(lease_ms);
        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let row = map.get_mut(&id).unwrap();
            row.status = NotificationStatus::Claimed;
            row.owner_id = Some(owner_id.to_string());
            row.lease_deadline = Some(deadline);
            claimed.push(ClaimedNotification {
                id: row.id,
                user_id: row.user_id.clone(),
                event_type: row.event_type.clone(),
                priority: row.priority,
                payload: row.payload.clone(),
                event_ts: row.event_ts,
                received_ts: row.received_ts,
            });
        }
        Ok(claimed)
    }

    async fn update_status_batch(
        &self,
        updates: &[StatusUpdate],
    ) -> Result<usize> {
        let mut map = self.rows.lock().unwrap();
        let mut applied = 0usize;
        for update in updates {
            let Some(row) = map.get_mut(&update.id) else {
                continue;
            };
            if row.status != NotificationStatus::Claimed {
                continue;
            }
            match update.status {
                NotificationStatus::Pushed => {
                    row.status = NotificationStatus::Pushed;
                    row.delivered_ts = Some(Utc::now());
                    row.owner_id = None;
                    row.lease_deadline = None;
                }
                NotificationStatus::Failed => {
                    row.status = NotificationStatus::Failed;
                    row.retry_count += 1;
                    row.last_error = update.error.clone();
                    row.owner_id = None;
                    row.lease_deadline = None;
                }
                _ => continue,
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn reclaim_expired(
        &self,
        max_retries: i32,
    ) -> Result<SweepOutcome> {
        let now = Utc::now();
        let mut map = self.rows.lock().unwrap();
        let mut outcome = SweepOutcome::default();
        for row in map.values_mut() {
            if row.status != NotificationStatus::Claimed {
                continue;
            }
            let Some(deadline) = row.lease_deadline else {
                continue;
            };
            if deadline >= now {
                continue;
            }
            row.owner_id = None;
            row.lease_deadline = None;
            if row.retry_count >= max_retries {
                row.status = NotificationStatus::Failed;
                row.last_error = Some("retry cap".to_string());
                outcome.exhausted += 1;
            } else {
                row.status = NotificationStatus::Pending;
                row.retry_count += 1;
                outcome.reverted += 1;
            }
        }
        Ok(outcome)
    }

    async fn recent_for_user(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let map = self.rows.lock().unwrap();
        let mut rows: Vec<Notification> = map
            .values()
            .filter(|row| &row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_ts.cmp(&a.created_ts));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}
