//! Log-bus ingestion.
//!
//! Consumes JSON event messages from the bus, buffers them into bounded
//! batches, and commits each batch to the store as one transactional
//! insert. Offsets advance only after a successful persist, so a crash
//! between persist and commit redelivers: duplicates are tolerated and
//! collapse on the id-unique insert.

use crate::error::{CoreError, Result};
use crate::store::NotificationStore;
use chrono::Utc;
use pushline_model::{
    BusEvent, Notification, NotificationId, NotificationStatus, UserId,
    priority::priority_for_event_type,
};
use rdkafka::{
    ClientConfig, Message, Offset, TopicPartitionList,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::BorrowedMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Max wait on one bus read so cancellation is observed promptly.
const RECV_MAX_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    /// Buffered rows that force a flush.
    pub batch_size: usize,
    /// Flush deadline measured from the first buffered message.
    pub linger: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "notification-events".to_string(),
            group_id: "pushline-delivery".to_string(),
            batch_size: 100,
            linger: Duration::from_millis(50),
        }
    }
}

pub struct Ingestor {
    consumer: StreamConsumer,
    store: Arc<dyn NotificationStore>,
    config: IngestConfig,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("topic", &self.config.topic)
            .field("group_id", &self.config.group_id)
            .field("batch_size", &self.config.batch_size)
            .finish()
    }
}

impl Ingestor {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn NotificationStore>,
    ) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .map_err(|e| {
                CoreError::Bus(format!("failed to create consumer: {e}"))
            })?;

        consumer.subscribe(&[&config.topic]).map_err(|e| {
            CoreError::Bus(format!("failed to subscribe to topic: {e}"))
        })?;

        info!(
            "Bus consumer initialized: brokers={}, topic={}, group={}",
            config.brokers, config.topic, config.group_id
        );

        Ok(Self {
            consumer,
            store,
            config,
        })
    }

    /// Consume until cancelled. The final buffered batch is flushed before
    /// returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut batch: Vec<Notification> = Vec::new();
        let mut offsets = TopicPartitionList::new();
        let mut first_buffered: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Ingestor shutting down");
                    self.flush(&mut batch, &mut offsets).await;
                    return Ok(());
                }
                recv = timeout(RECV_MAX_WAIT, self.consumer.recv()) => {
                    match recv {
                        Err(_elapsed) => {
                            // Quiet bus; fall through to the linger check.
                        }
                        Ok(Err(e)) => {
                            error!("bus consumer error: {e}");
                            tokio::time::sleep(Duration::from_secs(1))
                                .await;
                        }
                        Ok(Ok(message)) => {
                            self.buffer_message(
                                &message,
                                &mut batch,
                                &mut offsets,
                            );
                            if first_buffered.is_none()
                                && !batch.is_empty()
                            {
                                first_buffered = Some(Instant::now());
                            }
                        }
                    }
                }
            }

            let linger_elapsed = first_buffered
                .map(|t| t.elapsed() >= self.config.linger)
                .unwrap_or(false);
            if batch.len() >= self.config.batch_size || linger_elapsed {
                self.flush(&mut batch, &mut offsets).await;
                first_buffered = None;
            }
        }
    }

    fn buffer_message(
        &self,
        message: &BorrowedMessage<'_>,
        batch: &mut Vec<Notification>,
        offsets: &mut TopicPartitionList,
    ) {
        // Track the offset regardless of parse outcome: a message that
        // does not parse today never will, so re-reading it is pointless.
        if let Err(e) = offsets.add_partition_offset(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset() + 1),
        ) {
            warn!("failed to track offset: {e}");
        }

        let Some(payload) = message.payload() else {
            warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "empty bus message, skipping"
            );
            return;
        };

        let event: BusEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "unparseable bus message, skipping: {e}"
                );
                return;
            }
        };

        batch.push(Self::into_notification(event));
    }

    /// The event-type mapping is normative for priority; the producer's
    /// own priority field is informational only.
    fn into_notification(event: BusEvent) -> Notification {
        let now = Utc::now();
        Notification {
            id: NotificationId::new(),
            user_id: UserId::new(event.user_id),
            priority: priority_for_event_type(&event.event_type),
            event_type: event.event_type,
            status: NotificationStatus::Pending,
            payload: event.payload,
            event_ts: event.event_timestamp,
            received_ts: now,
            delivered_ts: None,
            owner_id: None,
            lease_deadline: None,
            retry_count: 0,
            last_error: None,
            created_ts: now,
        }
    }

    /// Persist the buffered batch, then advance consumer offsets. A failed
    /// persist logs every row and discards the batch without committing,
    /// so the bus redelivers after restart.
    async fn flush(
        &self,
        batch: &mut Vec<Notification>,
        offsets: &mut TopicPartitionList,
    ) {
        if batch.is_empty() && offsets.count() == 0 {
            return;
        }

        if !batch.is_empty() {
            match self.store.insert_batch(batch).await {
                Ok(outcome) => {
                    debug!(
                        inserted = outcome.inserted,
                        duplicates = outcome.duplicates,
                        "ingest batch persisted"
                    );
                }
                Err(e) => {
                    error!("ingest flush failed, discarding batch: {e}");
                    for row in batch.iter() {
                        warn!(
                            notification = %row.id,
                            user = %row.user_id,
                            event_type = %row.event_type,
                            "dropping buffered notification"
                        );
                    }
                    batch.clear();
                    *offsets = TopicPartitionList::new();
                    return;
                }
            }
            batch.clear();
        }

        if offsets.count() > 0 {
            if let Err(e) =
                self.consumer.commit(offsets, CommitMode::Sync)
            {
                warn!("offset commit failed: {e}");
            }
            *offsets = TopicPartitionList::new();
        }
    }
}
