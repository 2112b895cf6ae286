use crate::AppState;
use crate::handlers;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping_handler))
        .route("/health", get(handlers::health_handler))
        .route(
            "/notifications/stream",
            get(handlers::stream_notifications_handler),
        )
        .route(
            "/notifications/{user_id}",
            get(handlers::recent_notifications_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
