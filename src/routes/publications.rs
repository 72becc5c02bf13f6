use crate::{
    error::Result,
    models::{comment::CreateCommentRequest, publication::*},
    services::auth::AuthUser,
    state::AppState,
    utils::middleware::auth_middleware,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{delete, get, patch, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_publication))
        .route(
            "/:id",
            get(get_publication)
                .patch(edit_publication)
                .delete(delete_publication),
        )
        .route("/:id/highlight", patch(highlight_publication))
        .route("/:id/reactions/:reaction", post(react_to_publication))
        .route("/:id/share", post(share_publication))
        .route("/:id/report", post(report_publication))
        // 评论
        .route("/:id/comments", get(list_comments).post(create_comment))
        .route("/:id/comments/:comment_id", delete(delete_comment))
        .route("/:id/comments/:comment_id/report", post(report_comment))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// 发布帖子
/// POST /api/publications
pub async fn create_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreatePublicationRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    debug!("User {} creating publication", user.id);

    let publication = app_state.publication_service.create(&user.id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": PublicationView::from(publication)
        })),
    ))
}

/// GET /api/publications/:id
pub async fn get_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let publication = app_state.publication_service.view(&user.id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "data": publication
    })))
}

/// PATCH /api/publications/:id
pub async fn edit_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<EditPublicationRequest>,
) -> Result<Json<Value>> {
    let publication = app_state.publication_service.edit(&user.id, &id, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": publication
    })))
}

/// 作者或管理员删除帖子
/// DELETE /api/publications/:id
pub async fn delete_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    app_state.publication_service.delete(&user, &id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Publication deleted"
    })))
}

/// 高亮帖子（会员）
/// PATCH /api/publications/:id/highlight
pub async fn highlight_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let publication = app_state.publication_service.highlight(&user.id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "data": publication
    })))
}

/// 切换互动
/// POST /api/publications/:id/reactions/:reaction
pub async fn react_to_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, reaction)): Path<(String, Reaction)>,
) -> Result<Json<Value>> {
    let toggle = app_state.publication_service.react(&user.id, &id, reaction).await?;

    Ok(Json(json!({
        "success": true,
        "data": toggle
    })))
}

/// POST /api/publications/:id/share
pub async fn share_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let shares = app_state.publication_service.share(&user.id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "shares": shares }
    })))
}

/// POST /api/publications/:id/report
pub async fn report_publication(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    app_state.publication_service.report(&user.id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Publication reported"
    })))
}

/// 帖子的评论，按发表顺序
/// GET /api/publications/:id/comments
pub async fn list_comments(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let comments = app_state.comment_service.list(&user.id, &id).await?;

    Ok(Json(json!({
        "success": true,
        "data": comments
    })))
}

/// POST /api/publications/:id/comments
pub async fn create_comment(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let comment = app_state.comment_service.create(&user.id, &id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": comment
        })),
    ))
}

/// DELETE /api/publications/:id/comments/:comment_id
pub async fn delete_comment(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, comment_id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    app_state.comment_service.delete(&user, &id, &comment_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Comment deleted"
    })))
}

/// POST /api/publications/:id/comments/:comment_id/report
pub async fn report_comment(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, comment_id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    app_state.comment_service.report(&user.id, &id, &comment_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Comment reported"
    })))
}
