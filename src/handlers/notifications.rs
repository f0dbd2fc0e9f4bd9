use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use crate::{
    entities::notification::Model as NotificationModel,
    handlers::Identity,
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    summary = "List my notifications",
    responses(
        (status = 200, description = "Notifications retrieved", body = ApiResponse<serde_json::Value>),
        (status = 401, description = "Missing identity", body = crate::errors::ErrorResponse),
    ),
    tag = "Notifications"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Vec<NotificationModel>> {
    let notifications = state
        .services
        .notifications
        .list_for_user(identity.user_id)
        .await?;
    Ok(Json(ApiResponse::success(notifications)))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/read",
    summary = "Mark a notification read",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked read", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Notification not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Notifications"
)]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<NotificationModel> {
    let notification = state
        .services
        .notifications
        .mark_read(identity.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(notification)))
}
