use crate::{
    services::auth::AuthUser,
    state::AppState,
    utils::middleware::auth_middleware,
};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(websocket_handler))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// WebSocket 连接入口，登录 Cookie 在升级前校验
/// GET /api/socket
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Response {
    info!("WebSocket upgrade request from user: {}", user.id);

    let hub = state.websocket_service.clone();
    let messages = state.message_service.clone();
    ws.on_upgrade(move |socket| async move {
        hub.handle_connection(socket, user.id, messages).await;
    })
}
