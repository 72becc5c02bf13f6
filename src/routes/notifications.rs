use crate::{
    error::Result,
    models::notification::NotificationQuery,
    routes::paginated,
    services::auth::AuthUser,
    state::AppState,
    utils::middleware::auth_middleware,
};
use axum::{
    extract::{Path, Query, State},
    middleware,
    response::Json,
    routing::{get, patch},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications).patch(mark_all_as_read))
        .route("/unread-count", get(unread_count))
        .route("/:id", patch(mark_as_read))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// 通知列表，默认只看未读
/// GET /api/notifications?unread=false
pub async fn list_notifications(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Value>> {
    let result = app_state
        .notification_service
        .list_for(&user.id, query.unread.unwrap_or(true), query.page, query.limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": paginated("notifications", result)
    })))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let count = app_state.notification_service.unread_count(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "unread": count }
    })))
}

/// PATCH /api/notifications/:id
pub async fn mark_as_read(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let notification = app_state.notification_service.mark_as_read(&user.id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "data": notification
    })))
}

/// 全部标记为已读
/// PATCH /api/notifications
pub async fn mark_all_as_read(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let updated = app_state.notification_service.mark_all_as_read(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "updated": updated }
    })))
}
