//! PostgreSQL store integration tests.
//!
//! Each test runs against its own ephemeral database with the embedded
//! migrations applied, so the real skip-locked claim path is exercised
//! without any shared state between tests.

use chrono::Utc;
use pushline_core::store::{NotificationStore, PostgresStore};
use pushline_model::{
    Notification, NotificationId, NotificationStatus, Priority,
    StatusUpdate, UserId,
};
use sqlx::PgPool;
use std::collections::HashMap;

fn pending_row(user: &str, priority: Priority) -> Notification {
    let now = Utc::now();
    Notification {
        id: NotificationId::new(),
        user_id: UserId::new(user),
        event_type: "job.new".to_string(),
        priority,
        status: NotificationStatus::Pending,
        payload: HashMap::from([(
            "job_id".to_string(),
            "42".to_string(),
        )]),
        event_ts: now,
        received_ts: now,
        delivered_ts: None,
        owner_id: None,
        lease_deadline: None,
        retry_count: 0,
        last_error: None,
        created_ts: now,
    }
}

#[sqlx::test(migrator = "pushline_core::MIGRATOR")]
async fn insert_batch_skips_duplicate_ids(pool: PgPool) {
    let store = PostgresStore::from_pool(pool);

    let row = pending_row("u1", Priority::High);
    let first = store.insert_batch(&[row.clone()]).await.unwrap();
    assert_eq!(first.inserted, 1);

    // Redelivered bus message with the same id collapses to one row.
    let mut fresh = pending_row("u1", Priority::High);
    fresh.id = row.id;
    let second = store
        .insert_batch(&[fresh, pending_row("u1", Priority::Low)])
        .await
        .unwrap();
    assert_eq!(second.inserted, 1);
    assert_eq!(second.duplicates, 1);

    let rows = store
        .recent_for_user(&UserId::new("u1"), 100)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[sqlx::test(migrator = "pushline_core::MIGRATOR")]
async fn claim_orders_by_priority_then_age(pool: PgPool) {
    let store = PostgresStore::from_pool(pool);

    let mut batch = Vec::new();
    for _ in 0..100 {
        batch.push(pending_row("u1", Priority::Low));
    }
    store.insert_batch(&batch).await.unwrap();
    store
        .insert_batch(&[pending_row("u1", Priority::High)])
        .await
        .unwrap();

    let claimed = store.claim_batch("owner-a", 30_000, 10).await.unwrap();
    assert_eq!(claimed.len(), 10);
    assert_eq!(claimed[0].priority, Priority::High);
    assert!(
        claimed[1..]
            .iter()
            .all(|row| row.priority == Priority::Low)
    );
}

#[sqlx::test(migrator = "pushline_core::MIGRATOR")]
async fn concurrent_claimers_never_overlap(pool: PgPool) {
    let store = PostgresStore::from_pool(pool);

    let mut batch = Vec::new();
    for i in 0..1000 {
        batch.push(pending_row(&format!("u{}", i % 7), Priority::Medium));
    }
    store.insert_batch(&batch).await.unwrap();

    let mut tasks = Vec::new();
    for owner in ["replica-a", "replica-b", "replica-c", "replica-d"] {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let claimed = store
                    .claim_batch(owner, 30_000, 50)
                    .await
                    .unwrap();
                if claimed.is_empty() {
                    break;
                }
                mine.extend(claimed.into_iter().map(|row| row.id));
            }
            mine
        }));
    }

    let mut all_ids = Vec::new();
    for task in tasks {
        all_ids.extend(task.await.unwrap());
    }

    assert_eq!(all_ids.len(), 1000);
    let unique: std::collections::HashSet<_> =
        all_ids.iter().copied().collect();
    assert_eq!(unique.len(), 1000, "overlapping claims detected");
}

#[sqlx::test(migrator = "pushline_core::MIGRATOR")]
async fn status_updates_apply_only_to_claimed_rows(pool: PgPool) {
    let store = PostgresStore::from_pool(pool);

    store
        .insert_batch(&[
            pending_row("u1", Priority::High),
            pending_row("u1", Priority::High),
        ])
        .await
        .unwrap();
    let claimed = store.claim_batch("owner-a", 30_000, 2).await.unwrap();

    let applied = store
        .update_status_batch(&[
            StatusUpdate::pushed(claimed[0].id),
            StatusUpdate::failed(claimed[1].id, "socket write failed"),
            // Never claimed: a collision with a faster sweeper.
            StatusUpdate::pushed(NotificationId::new()),
        ])
        .await
        .unwrap();
    assert_eq!(applied, 2);

    let rows = store
        .recent_for_user(&UserId::new("u1"), 100)
        .await
        .unwrap();
    let pushed = rows
        .iter()
        .find(|row| row.id == claimed[0].id)
        .unwrap();
    assert_eq!(pushed.status, NotificationStatus::Pushed);
    assert!(pushed.delivered_ts.is_some());
    assert!(pushed.owner_id.is_none());

    let failed = rows
        .iter()
        .find(|row| row.id == claimed[1].id)
        .unwrap();
    assert_eq!(failed.status, NotificationStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("socket write failed")
    );
}

#[sqlx::test(migrator = "pushline_core::MIGRATOR")]
async fn reclaim_is_idempotent_and_caps_retries(pool: PgPool) {
    let store = PostgresStore::from_pool(pool);

    store
        .insert_batch(&[pending_row("u1", Priority::High)])
        .await
        .unwrap();

    // Walk the row through expiring leases until the cap terminates it.
    for expected_retry in 1..=3 {
        let claimed =
            store.claim_batch("owner-a", 1, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let swept = store.reclaim_expired(3).await.unwrap();
        assert_eq!(swept.reverted, 1);

        let row = store
            .recent_for_user(&UserId::new("u1"), 1)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(row.status, NotificationStatus::Pending);
        assert_eq!(row.retry_count, expected_retry);

        // A second sweep with no intervening claim is a no-op.
        let again = store.reclaim_expired(3).await.unwrap();
        assert_eq!(again.total(), 0);
    }

    let claimed = store.claim_batch("owner-a", 1, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let swept = store.reclaim_expired(3).await.unwrap();
    assert_eq!(swept.exhausted, 1);

    let row = store
        .recent_for_user(&UserId::new("u1"), 1)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.retry_count, 3);
    assert_eq!(row.last_error.as_deref(), Some("retry cap"));

    // Terminal rows are never claimed again.
    let claimed = store.claim_batch("owner-a", 30_000, 10).await.unwrap();
    assert!(claimed.is_empty());
}
