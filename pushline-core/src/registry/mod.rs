//! In-process push-channel registry.
//!
//! Maps user identities to their live sinks and fans frames out without
//! blocking: each sink has a bounded queue, full queues drop the frame at
//! that sink only. The map uses a reader-writer discipline; the write
//! guard is never held across I/O.

use crate::error::{CoreError, Result};
use chrono::Utc;
use pushline_model::{Frame, SinkId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frames buffered per sink before the offer starts dropping.
const SINK_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Global cap on concurrently registered sinks.
    pub max_connections: usize,
    /// Sinks idle longer than this are evicted by the maintenance loop.
    pub idle_timeout: Duration,
    /// Cadence of the liveness maintenance loop.
    pub maintenance_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// Registry-side handle to one live push channel.
#[derive(Debug, Clone)]
struct SinkHandle {
    id: SinkId,
    tx: mpsc::Sender<Frame>,
    last_activity: Arc<AtomicI64>,
}

impl SinkHandle {
    fn is_idle(&self, timeout: Duration) -> bool {
        let last = self.last_activity.load(Ordering::Relaxed);
        let now = Utc::now().timestamp();
        now - last > timeout.as_secs() as i64
    }
}

/// Edge-handler side of one push channel. Owned exclusively by the handler
/// that registered it; dropping the registry entry closes `rx`.
#[derive(Debug)]
pub struct Sink {
    pub id: SinkId,
    pub user_id: UserId,
    pub rx: mpsc::Receiver<Frame>,
    last_activity: Arc<AtomicI64>,
}

impl Sink {
    /// Record liveness. Called by the edge for every frame and heartbeat
    /// it writes to the client.
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }
}

/// Shared map from user identity to live sinks.
#[derive(Debug)]
pub struct Registry {
    sinks: RwLock<HashMap<UserId, Vec<SinkHandle>>>,
    active: AtomicUsize,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            config,
        }
    }

    /// Currently registered sink count across all users.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Allocate a sink for `user_id`. Fails once the global connection cap
    /// is reached.
    pub async fn register(&self, user_id: UserId) -> Result<Sink> {
        let cap = self.config.max_connections;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n >= cap { None } else { Some(n + 1) }
            })
            .map_err(|_| CoreError::CapacityExceeded)?;

        let (tx, rx) = mpsc::channel(SINK_QUEUE_CAPACITY);
        let last_activity =
            Arc::new(AtomicI64::new(Utc::now().timestamp()));
        let handle = SinkHandle {
            id: SinkId::new(),
            tx,
            last_activity: Arc::clone(&last_activity),
        };
        let sink = Sink {
            id: handle.id,
            user_id: user_id.clone(),
            rx,
            last_activity,
        };

        let mut sinks = self.sinks.write().await;
        sinks.entry(user_id.clone()).or_default().push(handle);
        drop(sinks);

        debug!(user = %user_id, sink = %sink.id, "sink registered");
        Ok(sink)
    }

    /// Remove one sink. The user's map entry disappears with its last sink.
    pub async fn unregister(&self, user_id: &UserId, sink_id: SinkId) {
        let mut sinks = self.sinks.write().await;
        let Some(handles) = sinks.get_mut(user_id) else {
            return;
        };

        let before = handles.len();
        handles.retain(|handle| handle.id != sink_id);
        let removed = before - handles.len();
        if handles.is_empty() {
            sinks.remove(user_id);
        }
        drop(sinks);

        if removed > 0 {
            self.active.fetch_sub(removed, Ordering::SeqCst);
            debug!(user = %user_id, sink = %sink_id, "sink unregistered");
        }
    }

    /// Offer `frame` to every live sink for `user_id`, non-blocking.
    ///
    /// A full queue drops the frame at that sink only; the send succeeds
    /// if at least one sink accepted. No sinks at all is a terminal
    /// delivery error at this replica.
    pub async fn send(
        &self,
        user_id: &UserId,
        frame: &Frame,
    ) -> Result<usize> {
        let handles = {
            let sinks = self.sinks.read().await;
            match sinks.get(user_id) {
                Some(handles) if !handles.is_empty() => handles.clone(),
                _ => {
                    return Err(CoreError::NoRecipient(user_id.clone()));
                }
            }
        };

        let mut accepted = 0usize;
        let mut dropped = 0usize;
        for handle in &handles {
            match handle.tx.try_send(frame.clone()) {
                Ok(()) => accepted += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!(
                        user = %user_id,
                        sink = %handle.id,
                        "sink queue full, dropping frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Handler already gone; maintenance or unregister
                    // will remove the handle shortly.
                    dropped += 1;
                }
            }
        }

        if accepted == 0 {
            return Err(CoreError::SinksRefused(user_id.clone()));
        }

        if dropped > 0 {
            debug!(
                user = %user_id,
                accepted,
                dropped,
                "partial fan-out"
            );
        }
        Ok(accepted)
    }

    /// Evict sinks whose last activity is older than the idle timeout.
    /// Dropping the registry-side sender closes the handler's receiver,
    /// which terminates the owning stream.
    pub async fn evict_idle(&self) -> usize {
        let timeout = self.config.idle_timeout;
        let mut evicted = 0usize;

        let mut sinks = self.sinks.write().await;
        sinks.retain(|user_id, handles| {
            let before = handles.len();
            handles.retain(|handle| {
                let stale = handle.is_idle(timeout);
                if stale {
                    info!(
                        user = %user_id,
                        sink = %handle.id,
                        "evicting stale sink"
                    );
                }
                !stale
            });
            evicted += before - handles.len();
            !handles.is_empty()
        });
        drop(sinks);

        if evicted > 0 {
            self.active.fetch_sub(evicted, Ordering::SeqCst);
        }
        evicted
    }

    /// Background liveness loop. Runs until the root token is cancelled.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.maintenance_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Registry maintenance shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let evicted = registry.evict_idle().await;
                        if evicted > 0 {
                            info!(evicted, "evicted stale sinks");
                        }
                    }
                }
            }
        })
    }
}
