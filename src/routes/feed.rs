use crate::{
    error::Result,
    routes::paginated,
    services::auth::AuthUser,
    state::AppState,
    utils::middleware::auth_middleware,
};
use axum::{
    extract::{Query, State},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_feed))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// 首页：关注动态、推荐关注和今日高亮
/// GET /api/feed
pub async fn get_feed(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Value>> {
    let (feed, suggestions, highlighted) = tokio::try_join!(
        app_state.publication_service.feed(&user.id, query.page, query.limit),
        app_state.user_service.suggestions(&user.id),
        app_state.publication_service.highlighted(),
    )?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "feed": paginated("publications", feed),
            "suggestions": suggestions,
            "highlighted": highlighted,
        }
    })))
}
