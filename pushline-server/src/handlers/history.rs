use crate::AppState;
use crate::errors::{AppError, AppResult};
use axum::{
    extract::{Path, State},
    response::Json,
};
use pushline_model::UserId;
use serde_json::{Value, json};
use tracing::warn;

/// Most recent notifications kept for a reconnecting client.
const HISTORY_LIMIT: i64 = 100;

pub async fn recent_notifications_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Value>> {
    let user_id = UserId::new(user_id);
    let notifications = state
        .store
        .recent_for_user(&user_id, HISTORY_LIMIT)
        .await
        .map_err(|e| {
            warn!(user = %user_id, "history lookup failed: {e}");
            AppError::from(e)
        })?;

    Ok(Json(json!({
        "user_id": user_id,
        "count": notifications.len(),
        "notifications": notifications,
    })))
}
