use crate::{
    error::{AppError, Result},
    models::message::{HistoryQuery, SendMessage, SendMessageRequest},
    routes::paginated,
    services::auth::AuthUser,
    state::AppState,
    utils::middleware::auth_middleware,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, patch},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use validator::Validate;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_chats))
        .route("/read/:id", patch(mark_as_read))
        .route("/:room", get(room_history).post(send_message))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// 会话列表
/// GET /api/messages
pub async fn list_chats(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let chats = app_state.message_service.list_chats(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": chats
    })))
}

/// 房间历史消息，不依赖实时连接
/// GET /api/messages/:room
pub async fn room_history(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>> {
    let result = app_state
        .message_service
        .history(&user.id, &room, query.page, query.limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": paginated("messages", result)
    })))
}

/// 通过 REST 发送私信，落库后推送给在线的房间成员
/// POST /api/messages/:room
pub async fn send_message(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(room): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    request.validate().map_err(AppError::ValidatorError)?;

    let payload = SendMessage {
        room,
        sender: user.id.clone(),
        receiver: request.receiver,
        content: request.content,
    };
    let message = app_state.message_service.deliver(&user.id, payload, None).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": message
        })),
    ))
}

/// PATCH /api/messages/read/:id
pub async fn mark_as_read(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let message = app_state.message_service.mark_as_read(&user.id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "data": message
    })))
}
