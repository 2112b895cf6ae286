use crate::AppState;
use crate::errors::{AppError, AppResult};
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use chrono::Utc;
use futures::Stream;
use pushline_core::Registry;
use pushline_model::{Frame, SinkId, UserId};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Heartbeat cadence on an open push channel.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    user_id: Option<String>,
}

/// Long-lived push channel: `connected` preamble, then notification and
/// heartbeat frames until the client disconnects, the sink is evicted, or
/// the server shuts down.
pub async fn stream_notifications_handler(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Some(user_id) =
        params.user_id.filter(|value| !value.is_empty())
    else {
        return Err(AppError::bad_request(
            "user_id query parameter is required",
        ));
    };
    let user_id = UserId::new(user_id);

    let mut sink =
        state.registry.register(user_id.clone()).await.map_err(
            |e| {
                info!(user = %user_id, "stream rejected: {e}");
                AppError::from(e)
            },
        )?;
    info!(user = %user_id, sink = %sink.id, "push channel opened");

    // The guard travels into the stream so a client disconnect at any
    // point tears the sink out of the registry.
    let guard = SinkGuard {
        registry: Arc::clone(&state.registry),
        user_id: user_id.clone(),
        sink_id: sink.id,
    };
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok(sse_event(&Frame::Connected));

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(user = %user_id, "closing stream on shutdown");
                    None
                }
                maybe = sink.rx.recv() => match maybe {
                    Some(frame) => {
                        sink.touch();
                        Some(sse_event(&frame))
                    }
                    None => {
                        // Evicted by registry maintenance.
                        debug!(user = %user_id, "sink closed, ending stream");
                        None
                    }
                },
                _ = heartbeat.tick() => {
                    sink.touch();
                    Some(sse_event(&Frame::heartbeat(Utc::now())))
                }
            };

            match event {
                Some(event) => yield Ok(event),
                None => break,
            }
        }
    };

    Ok(Sse::new(stream))
}

fn sse_event(frame: &Frame) -> Event {
    Event::default()
        .event(frame.event_name())
        .data(frame.data().to_string())
}

/// Unregisters the sink when the response stream is dropped, however the
/// connection ends.
struct SinkGuard {
    registry: Arc<Registry>,
    user_id: UserId,
    sink_id: SinkId,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let user_id = self.user_id.clone();
        let sink_id = self.sink_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.unregister(&user_id, sink_id).await;
            });
        }
    }
}
