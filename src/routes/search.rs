use crate::{
    error::Result,
    models::search::SearchQuery,
    routes::paginated,
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
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(search_users))
        .route("/publications", get(search_publications))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// 搜索用户
/// GET /api/search/users?q=
pub async fn search_users(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>> {
    debug!("Searching users with query: {:?}", query);

    let result = app_state
        .search_service
        .search_users(&query.q, query.page, query.limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": paginated("users", result)
    })))
}

/// 搜索帖子
/// GET /api/search/publications?q=
pub async fn search_publications(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>> {
    debug!("Searching publications with query: {:?}", query);

    let result = app_state
        .search_service
        .search_publications(&query.q, query.page, query.limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": paginated("publications", result)
    })))
}
