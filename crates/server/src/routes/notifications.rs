use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::notification::Notification;
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub email: String,
}

/// Notifications addressed to `email` plus broadcasts
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<InboxQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Notification>>>, ApiError> {
    let notifications = state.notifications.list_for(&query.email).await?;
    Ok(ResponseJson(ApiResponse::success(notifications)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Notification>>, ApiError> {
    let notification = state.notifications.mark_read(notification_id).await?;
    Ok(ResponseJson(ApiResponse::success(notification)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/{notification_id}/read", post(mark_read))
}
