use crate::error::{CoreError, Result};
use crate::store::{InsertOutcome, NotificationStore, SweepOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pushline_model::{
    ClaimedNotification, Notification, NotificationId, NotificationStatus,
    Priority, StatusUpdate, UserId,
};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, trace, warn};
use uuid::Uuid;

/// Per-statement deadline applied server-side to every store operation.
const STATEMENT_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    max_connections: u32,
}

impl fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl PostgresStore {
    pub async fn connect(connection_string: &str) -> Result<Self> {
        // Pool sizing from environment or core-count default
        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(num_cpus::get() as u32);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(2);

        let connect_options =
            PgConnectOptions::from_str(connection_string)
                .map_err(|e| {
                    CoreError::Store(format!("invalid database URL: {e}"))
                })?
                .options([(
                    "statement_timeout",
                    STATEMENT_TIMEOUT_MS.to_string().as_str(),
                )]);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .max_lifetime(std::time::Duration::from_secs(1800))
            .idle_timeout(std::time::Duration::from_secs(600))
            .test_before_acquire(true)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                CoreError::Store(format!("database connection failed: {e}"))
            })?;

        info!(
            "Store pool initialized with max_connections={}, min_connections={}",
            max_connections, min_connections
        );

        Ok(PostgresStore {
            pool,
            max_connections,
        })
    }

    /// Create a PostgresStore from an existing pool (mainly for testing)
    pub fn from_pool(pool: PgPool) -> Self {
        // Use default values for test pools
        PostgresStore {
            pool,
            max_connections: 20,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations. The partial indexes cover the two hot
    /// access paths: pending-row claims and expired-lease sweeps.
    pub async fn initialize_schema(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await.map_err(|e| {
            CoreError::Store(format!("migration failed: {e}"))
        })?;

        info!("Notification schema initialized");
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert_batch(
        &self,
        rows: &[Notification],
    ) -> Result<InsertOutcome> {
        if rows.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            CoreError::Store(format!("begin insert tx failed: {e}"))
        })?;

        let mut outcome = InsertOutcome::default();
        for row in rows {
            let payload = serde_json::to_value(&row.payload)?;
            let result = sqlx::query(
                r#"
                INSERT INTO notifications (
                    id, user_id, event_type, priority, status, payload,
                    event_ts, received_ts, retry_count, created_ts
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(row.id.to_uuid())
            .bind(row.user_id.as_str())
            .bind(&row.event_type)
            .bind(row.priority.rank())
            .bind(row.status.as_str())
            .bind(payload)
            .bind(row.event_ts)
            .bind(row.received_ts)
            .bind(row.retry_count)
            .bind(row.created_ts)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                CoreError::Store(format!("insert_batch insert failed: {e}"))
            })?;

            if result.rows_affected() == 0 {
                warn!(
                    notification = %row.id,
                    user = %row.user_id,
                    "duplicate notification id, skipping row"
                );
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit().await.map_err(|e| {
            CoreError::Store(format!("insert_batch commit failed: {e}"))
        })?;

        Ok(outcome)
    }

    async fn claim_batch(
        &self,
        owner_id: &str,
        lease_ms: i64,
        max_n: usize,
    ) -> Result<Vec<ClaimedNotification>> {
        if max_n == 0 {
            return Ok(Vec::new());
        }

        // Single statement: pick under SKIP LOCKED, flip to claimed, and
        // return the delivery projection in claim order.
        let rows = sqlx::query_as::<_, ClaimRow>(
            r#"
            WITH picked AS (
                SELECT id
                FROM notifications
                WHERE status = 'pending'
                ORDER BY priority ASC, created_ts ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ), claimed AS (
                UPDATE notifications n
                SET status = 'claimed',
                    owner_id = $2,
                    lease_deadline = NOW()
                        + ($3::bigint) * INTERVAL '1 millisecond'
                FROM picked
                WHERE n.id = picked.id
                RETURNING n.id, n.user_id, n.event_type, n.priority,
                          n.payload, n.event_ts, n.received_ts, n.created_ts
            )
            SELECT id, user_id, event_type, priority, payload,
                   event_ts, received_ts
            FROM claimed
            ORDER BY priority ASC, created_ts ASC
            "#,
        )
        .bind(max_n as i64)
        .bind(owner_id)
        .bind(lease_ms)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            CoreError::Store(format!("claim_batch failed: {e}"))
        })?;

        rows.into_iter().map(ClaimRow::into_claimed).collect()
    }

    async fn update_status_batch(
        &self,
        updates: &[StatusUpdate],
    ) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            CoreError::Store(format!("begin status tx failed: {e}"))
        })?;

        let mut applied = 0usize;
        for update in updates {
            let result = match update.status {
                NotificationStatus::Pushed => sqlx::query(
                    r#"
                    UPDATE notifications
                    SET status = 'pushed',
                        delivered_ts = NOW(),
                        owner_id = NULL,
                        lease_deadline = NULL
                    WHERE id = $1 AND status = 'claimed'
                    "#,
                )
                .bind(update.id.to_uuid())
                .execute(&mut *tx)
                .await,
                NotificationStatus::Failed => sqlx::query(
                    r#"
                    UPDATE notifications
                    SET status = 'failed',
                        retry_count = retry_count + 1,
                        last_error = $2,
                        owner_id = NULL,
                        lease_deadline = NULL
                    WHERE id = $1 AND status = 'claimed'
                    "#,
                )
                .bind(update.id.to_uuid())
                .bind(update.error.as_deref())
                .execute(&mut *tx)
                .await,
                other => {
                    warn!(
                        notification = %update.id,
                        status = %other,
                        "ignoring non-terminal status update"
                    );
                    continue;
                }
            };

            let result = result.map_err(|e| {
                CoreError::Store(format!("status update failed: {e}"))
            })?;

            if result.rows_affected() == 0 {
                // Lease was swept out from under us; the row is already
                // back in pending or terminal. Nothing to do here.
                trace!(
                    notification = %update.id,
                    "status update skipped, row no longer claimed"
                );
            } else {
                applied += 1;
            }
        }

        tx.commit().await.map_err(|e| {
            CoreError::Store(format!("status batch commit failed: {e}"))
        })?;

        Ok(applied)
    }

    async fn reclaim_expired(
        &self,
        max_retries: i32,
    ) -> Result<SweepOutcome> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            CoreError::Store(format!("begin sweep tx failed: {e}"))
        })?;

        // Terminal branch first: rows already at the cap keep their count
        // and die with a diagnostic instead of cycling forever.
        let exhausted = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed',
                owner_id = NULL,
                lease_deadline = NULL,
                last_error = 'retry cap'
            WHERE status = 'claimed'
              AND lease_deadline < NOW()
              AND retry_count >= $1
            "#,
        )
        .bind(max_retries)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            CoreError::Store(format!("sweep terminal branch failed: {e}"))
        })?
        .rows_affected();

        let reverted = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'pending',
                owner_id = NULL,
                lease_deadline = NULL,
                retry_count = retry_count + 1
            WHERE status = 'claimed'
              AND lease_deadline < NOW()
              AND retry_count < $1
            "#,
        )
        .bind(max_retries)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            CoreError::Store(format!("sweep revert branch failed: {e}"))
        })?
        .rows_affected();

        tx.commit().await.map_err(|e| {
            CoreError::Store(format!("sweep commit failed: {e}"))
        })?;

        Ok(SweepOutcome {
            reverted,
            exhausted,
        })
    }

    async fn recent_for_user(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, user_id, event_type, priority, status, payload,
                   event_ts, received_ts, delivered_ts, owner_id,
                   lease_deadline, retry_count, last_error, created_ts
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_ts DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            CoreError::Store(format!("recent_for_user failed: {e}"))
        })?;

        rows.into_iter().map(NotificationRow::into_notification).collect()
    }
}

// Database row type for the claim projection
#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: Uuid,
    user_id: String,
    event_type: String,
    priority: i16,
    payload: serde_json::Value,
    event_ts: DateTime<Utc>,
    received_ts: DateTime<Utc>,
}

impl ClaimRow {
    fn into_claimed(self) -> Result<ClaimedNotification> {
        let priority = Priority::from_rank(self.priority)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let payload: HashMap<String, String> =
            serde_json::from_value(self.payload).map_err(|e| {
                CoreError::Internal(format!(
                    "failed to deserialize payload: {e}"
                ))
            })?;

        Ok(ClaimedNotification {
            id: NotificationId(self.id),
            user_id: UserId::new(self.user_id),
            event_type: self.event_type,
            priority,
            payload,
            event_ts: self.event_ts,
            received_ts: self.received_ts,
        })
    }
}

// Database row type for full notification rows
#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: String,
    event_type: String,
    priority: i16,
    status: String,
    payload: serde_json::Value,
    event_ts: DateTime<Utc>,
    received_ts: DateTime<Utc>,
    delivered_ts: Option<DateTime<Utc>>,
    owner_id: Option<String>,
    lease_deadline: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
    created_ts: DateTime<Utc>,
}

impl NotificationRow {
    fn into_notification(self) -> Result<Notification> {
        let priority = Priority::from_rank(self.priority)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let status = self
            .status
            .parse::<NotificationStatus>()
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let payload: HashMap<String, String> =
            serde_json::from_value(self.payload).map_err(|e| {
                CoreError::Internal(format!(
                    "failed to deserialize payload: {e}"
                ))
            })?;

        Ok(Notification {
            id: NotificationId(self.id),
            user_id: UserId::new(self.user_id),
            event_type: self.event_type,
            priority,
            status,
            payload,
            event_ts: self.event_ts,
            received_ts: self.received_ts,
            delivered_ts: self.delivered_ts,
            owner_id: self.owner_id,
            lease_deadline: self.lease_deadline,
            retry_count: self.retry_count,
            last_error: self.last_error,
            created_ts: self.created_ts,
        })
    }
}
