use crate::AppState;
use axum::{extract::State, response::Json};
use serde_json::{Value, json};
use tracing::info;

pub async fn ping_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Pushline server is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let active_connections = state.registry.active_connections();
    info!(active_connections, "health check");

    Json(json!({
        "status": "healthy",
        "active_connections": active_connections,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
