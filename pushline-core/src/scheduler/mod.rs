//! Lease-based delivery scheduling.
//!
//! Claim workers poll the store and hand claimed rows to delivery workers
//! over a bounded MPMC channel; delivery workers fan out through the
//! registry and report outcomes to a single status flusher, which applies
//! them back to the store in coarse batches. A sweeper reverts expired
//! leases. Retries happen only through lease expiry plus re-claim; the
//! delivery path itself never retries.

use crate::error::CoreError;
use crate::registry::Registry;
use crate::store::NotificationStore;
use pushline_model::{ClaimedNotification, Frame, StatusUpdate};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Parallel claim loops.
    pub claim_workers: usize,
    /// Parallel fan-out attempts.
    pub delivery_workers: usize,
    /// Rows per claim.
    pub batch_size: usize,
    /// Claim cadence per worker.
    pub poll_interval: Duration,
    /// Claim lifetime before the sweeper may reclaim.
    pub lease_duration: Duration,
    /// Claim → delivery channel bound; governs back-pressure.
    pub hand_off_capacity: usize,
    /// Status update batching cadence.
    pub status_flush_interval: Duration,
    /// Lease expiry sweep cadence.
    pub sweep_interval: Duration,
    /// Terminal failure threshold.
    pub max_retries: i32,
    /// Per-worker join bound during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            claim_workers: 10,
            delivery_workers: 50,
            batch_size: 500,
            poll_interval: Duration::from_millis(100),
            lease_duration: Duration::from_secs(30),
            hand_off_capacity: 5000,
            status_flush_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(10),
            max_retries: 3,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Supervises the claim, delivery, flush, and sweep workers of a single
/// process. All workers share one `owner_id`; lease semantics do not
/// distinguish workers within a process.
pub struct Scheduler {
    store: Arc<dyn NotificationStore>,
    registry: Arc<Registry>,
    config: SchedulerConfig,
    owner_id: String,
    shutdown: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("owner_id", &self.owner_id)
            .field("config", &self.config)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: Arc<Registry>,
        config: SchedulerConfig,
        owner_id: String,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            owner_id,
            shutdown,
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub async fn start(&self) {
        let (hand_off_tx, hand_off_rx) =
            async_channel::bounded::<ClaimedNotification>(
                self.config.hand_off_capacity,
            );
        let (status_tx, status_rx) = mpsc::channel::<StatusUpdate>(
            self.config.hand_off_capacity,
        );
        let status_rx = Arc::new(Mutex::new(status_rx));

        let mut handles = self.worker_handles.lock().await;

        for i in 0..self.config.claim_workers {
            let store = Arc::clone(&self.store);
            let tx = hand_off_tx.clone();
            let owner_id = self.owner_id.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown.clone();
            handles.push(spawn_supervised(
                format!("claim-w{i}"),
                shutdown.clone(),
                move || {
                    claim_loop(
                        Arc::clone(&store),
                        tx.clone(),
                        owner_id.clone(),
                        config.clone(),
                        shutdown.clone(),
                    )
                },
            ));
        }

        for i in 0..self.config.delivery_workers {
            let registry = Arc::clone(&self.registry);
            let rx = hand_off_rx.clone();
            let tx = status_tx.clone();
            let shutdown = self.shutdown.clone();
            handles.push(spawn_supervised(
                format!("delivery-w{i}"),
                shutdown.clone(),
                move || {
                    delivery_loop(
                        Arc::clone(&registry),
                        rx.clone(),
                        tx.clone(),
                        shutdown.clone(),
                    )
                },
            ));
        }

        // The spawned workers hold the only channel ends now. Dropping
        // ours lets the pipeline collapse in order on shutdown: claim
        // workers close the hand-off, delivery workers close the status
        // channel, the flusher drains and exits last.
        drop(hand_off_tx);
        drop(hand_off_rx);
        drop(status_tx);

        {
            let store = Arc::clone(&self.store);
            let interval = self.config.status_flush_interval;
            handles.push(spawn_supervised(
                "status-flusher".to_string(),
                self.shutdown.clone(),
                move || {
                    flush_loop(
                        Arc::clone(&store),
                        Arc::clone(&status_rx),
                        interval,
                    )
                },
            ));
        }

        {
            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let shutdown = self.shutdown.clone();
            handles.push(spawn_supervised(
                "sweeper".to_string(),
                shutdown.clone(),
                move || {
                    sweep_loop(
                        Arc::clone(&store),
                        config.clone(),
                        shutdown.clone(),
                    )
                },
            ));
        }

        info!(
            owner = %self.owner_id,
            claim_workers = self.config.claim_workers,
            delivery_workers = self.config.delivery_workers,
            "scheduler started"
        );
    }

    /// Cancel and join every worker. The status flusher drains remaining
    /// outcomes before its handle resolves.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of scheduler");
        self.shutdown.cancel();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(self.config.shutdown_grace, handle)
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("worker task failed: {e:?}"),
                Err(_) => {
                    warn!("worker task timed out during shutdown")
                }
            }
        }
    }
}

/// Run `factory`'s future to completion, restarting it after a panic.
/// A clean exit or cancellation ends supervision.
fn spawn_supervised<F, Fut>(
    name: String,
    shutdown: CancellationToken,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let task = tokio::spawn(factory());
            match task.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    error!(worker = %name, "worker panicked, restarting");
                    if shutdown.is_cancelled() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                Err(_) => break,
            }
        }
    })
}

/// Poll the store on a fixed cadence and push every claimed row onto the
/// hand-off. A full hand-off blocks the worker: back-pressure reaches the
/// store instead of shedding rows.
async fn claim_loop(
    store: Arc<dyn NotificationStore>,
    hand_off: async_channel::Sender<ClaimedNotification>,
    owner_id: String,
    config: SchedulerConfig,
    shutdown: CancellationToken,
) {
    let lease_ms = config.lease_duration.as_millis() as i64;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }

        match store
            .claim_batch(&owner_id, lease_ms, config.batch_size)
            .await
        {
            Ok(rows) => {
                if rows.is_empty() {
                    continue;
                }
                trace!(count = rows.len(), "claimed batch");
                for row in rows {
                    if hand_off.send(row).await.is_err() {
                        // Delivery pool is gone; nothing left to do.
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("claim failed, retrying next tick: {e}");
            }
        }
    }
}

/// Pull one row at a time off the hand-off, fan it out, and report the
/// outcome. No synchronous retry: a failed fan-out becomes a `failed`
/// status and any redelivery happens through lease expiry.
async fn delivery_loop(
    registry: Arc<Registry>,
    hand_off: async_channel::Receiver<ClaimedNotification>,
    status: mpsc::Sender<StatusUpdate>,
    shutdown: CancellationToken,
) {
    loop {
        let row = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            recv = hand_off.recv() => match recv {
                Ok(row) => row,
                Err(_) => break,
            }
        };

        let frame = Frame::notification(&row);
        let update = match registry.send(&row.user_id, &frame).await {
            Ok(accepted) => {
                trace!(
                    notification = %row.id,
                    user = %row.user_id,
                    accepted,
                    "notification delivered"
                );
                StatusUpdate::pushed(row.id)
            }
            Err(e @ CoreError::NoRecipient(_))
            | Err(e @ CoreError::SinksRefused(_)) => {
                debug!(
                    notification = %row.id,
                    user = %row.user_id,
                    "delivery failed: {e}"
                );
                StatusUpdate::failed(row.id, e.to_string())
            }
            Err(e) => {
                warn!(
                    notification = %row.id,
                    user = %row.user_id,
                    "unexpected delivery error: {e}"
                );
                StatusUpdate::failed(row.id, e.to_string())
            }
        };

        if status.send(update).await.is_err() {
            warn!("status flusher gone, dropping outcome");
            break;
        }
    }
}

/// Single consumer of delivery outcomes. Buffers and applies them on a
/// coarse cadence; exits only after every sender is gone, with one final
/// unconditional flush, so shutdown never drops outcomes.
async fn flush_loop(
    store: Arc<dyn NotificationStore>,
    status_rx: Arc<Mutex<mpsc::Receiver<StatusUpdate>>>,
    interval: Duration,
) {
    let mut rx = status_rx.lock().await;
    let mut buffer: Vec<StatusUpdate> = Vec::new();
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(
        tokio::time::MissedTickBehavior::Delay,
    );
    tick.tick().await;

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(update) => buffer.push(update),
                None => break,
            },
            _ = tick.tick() => {
                flush_buffer(store.as_ref(), &mut buffer).await;
            }
        }
    }

    // All delivery workers have exited; drain stragglers and flush.
    while let Ok(update) = rx.try_recv() {
        buffer.push(update);
    }
    flush_buffer(store.as_ref(), &mut buffer).await;
    info!("Status flusher drained and stopped");
}

/// On failure the buffer is kept for the next tick; updates are never
/// dropped while the flusher lives.
async fn flush_buffer(
    store: &dyn NotificationStore,
    buffer: &mut Vec<StatusUpdate>,
) {
    if buffer.is_empty() {
        return;
    }
    match store.update_status_batch(buffer).await {
        Ok(applied) => {
            debug!(
                applied,
                submitted = buffer.len(),
                "status batch applied"
            );
            buffer.clear();
        }
        Err(e) => {
            warn!(
                buffered = buffer.len(),
                "status flush failed, retrying next tick: {e}"
            );
        }
    }
}

/// Revert expired leases on a fixed cadence.
async fn sweep_loop(
    store: Arc<dyn NotificationStore>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Sweeper shutting down");
                break;
            }
            _ = tokio::time::sleep(config.sweep_interval) => {}
        }

        match store.reclaim_expired(config.max_retries).await {
            Ok(outcome) if outcome.total() > 0 => {
                info!(
                    reverted = outcome.reverted,
                    exhausted = outcome.exhausted,
                    "reclaimed expired leases"
                );
            }
            Ok(_) => {}
            Err(e) => warn!("lease sweep failed: {e}"),
        }
    }
}
