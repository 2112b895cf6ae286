//! Router-level tests over an in-memory store double.

use crate::AppState;
use crate::routes::create_app;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use pushline_core::error::Result as CoreResult;
use pushline_core::registry::{Registry, RegistryConfig};
use pushline_core::store::{
    InsertOutcome, NotificationStore, SweepOutcome,
};
use pushline_model::{
    ClaimedNotification, Notification, NotificationId,
    NotificationStatus, Priority, StatusUpdate, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Debug, Default)]
struct TestStore {
    rows: Mutex<Vec<Notification>>,
}

impl TestStore {
    fn seed(&self, user: &str, event_type: &str) -> NotificationId {
        let now = Utc::now();
        let row = Notification {
            id: NotificationId::new(),
            user_id: UserId::new(user),
            event_type: event_type.to_string(),
            priority: Priority::High,
            status: NotificationStatus::Pushed,
            payload: HashMap::from([(
                "job_id".to_string(),
                "42".to_string(),
            )]),
            event_ts: now,
            received_ts: now,
            delivered_ts: Some(now),
            owner_id: None,
            lease_deadline: None,
            retry_count: 0,
            last_error: None,
            created_ts: now,
        };
        let id = row.id;
        self.rows.lock().unwrap().push(row);
        id
    }
}

#[async_trait]
impl NotificationStore for TestStore {
    async fn insert_batch(
        &self,
        rows: &[Notification],
    ) -> CoreResult<InsertOutcome> {
        let mut guard = self.rows.lock().unwrap();
        guard.extend(rows.iter().cloned());
        Ok(InsertOutcome {
            inserted: rows.len(),
            duplicates: 0,
        })
    }

    async fn claim_batch(
        &self,
        _owner_id: &str,
        _lease_ms: i64,
        _max_n: usize,
    ) -> CoreResult<Vec<ClaimedNotification>> {
        Ok(Vec::new())
    }

    async fn update_status_batch(
        &self,
        _updates: &[StatusUpdate],
    ) -> CoreResult<usize> {
        Ok(0)
    }

    async fn reclaim_expired(
        &self,
        _max_retries: i32,
    ) -> CoreResult<SweepOutcome> {
        Ok(SweepOutcome::default())
    }

    async fn recent_for_user(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> CoreResult<Vec<Notification>> {
        let guard = self.rows.lock().unwrap();
        Ok(guard
            .iter()
            .filter(|row| &row.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

fn test_state(max_connections: usize) -> (AppState, Arc<TestStore>) {
    let store = Arc::new(TestStore::default());
    let state = AppState {
        store: Arc::clone(&store) as Arc<dyn NotificationStore>,
        registry: Arc::new(Registry::new(RegistryConfig {
            max_connections,
            ..Default::default()
        })),
        shutdown: CancellationToken::new(),
    };
    (state, store)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes =
        axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn stream_without_user_id_is_bad_request() {
    let (state, _) = test_state(10);
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/notifications/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("user_id")
    );
}

#[tokio::test]
async fn stream_over_capacity_is_service_unavailable() {
    let (state, _) = test_state(0);
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/notifications/stream?user_id=u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(
        body["error"]["message"],
        "max connections reached"
    );
}

#[tokio::test]
async fn stream_opens_as_event_stream() {
    let (state, _) = test_state(10);
    let registry = Arc::clone(&state.registry);
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/notifications/stream?user_id=u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "text/event-stream"
    );
    assert_eq!(registry.active_connections(), 1);
}

#[tokio::test]
async fn health_reports_active_connections() {
    let (state, _) = test_state(10);
    let registry = Arc::clone(&state.registry);
    let _sink = registry.register(UserId::new("u1")).await.unwrap();
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_connections"], 1);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn history_returns_recent_notifications() {
    let (state, store) = test_state(10);
    store.seed("u1", "job.new");
    store.seed("u1", "follower.new");
    store.seed("someone-else", "job.new");
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/notifications/u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["count"], 2);
    let notifications = body["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0]["priority"], "HIGH");
    assert_eq!(notifications[0]["payload"]["job_id"], "42");
}

#[tokio::test]
async fn ping_answers() {
    let (state, _) = test_state(10);
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}
