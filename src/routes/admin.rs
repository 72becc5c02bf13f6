use axum::{
    extract::{Path, Query, State},
    middleware,
    response::Json,
    routing::{delete, get, patch},
    Router,
};
use std::sync::Arc;

use crate::{
    error::Result,
    models::{
        admin::*,
        comment::Comment,
        publication::PublicationView,
        response::ApiResponse,
        socket::RealtimeStats,
        subscription::Transaction,
        user::Account,
    },
    services::{auth::AuthUser, database::PaginatedResult},
    state::AppState,
    utils::middleware::{auth_middleware, require_admin},
};

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(get_dashboard_stats))
        .route("/users", get(list_users))
        .route("/users/:username", delete(delete_user))
        .route("/users/:username/status", patch(toggle_user_status))
        .route("/publications", get(list_publications))
        .route("/publications/:id", delete(delete_publication))
        .route("/comments", get(list_comments))
        .route("/comments/:id", delete(delete_comment))
        .route("/transactions", get(list_transactions))
        .route("/reports/:report", get(get_report))
        .route("/realtime", get(get_realtime_stats))
        // 先认证，再校验管理员角色
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// 后台统计
async fn get_dashboard_stats(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<DashboardStats>>> {
    let stats = app_state.admin_service.stats().await?;

    Ok(Json(ApiResponse::success(stats)))
}

async fn list_users(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Account>>>> {
    let users = app_state.admin_service.list_users(query).await?;

    Ok(Json(ApiResponse::success(users)))
}

async fn list_publications(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<PublicationView>>>> {
    let publications = app_state.admin_service.list_publications(query).await?;

    Ok(Json(ApiResponse::success(publications)))
}

async fn list_comments(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Comment>>>> {
    let comments = app_state.admin_service.list_comments(query).await?;

    Ok(Json(ApiResponse::success(comments)))
}

async fn list_transactions(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Transaction>>>> {
    let transactions = app_state.admin_service.list_transactions(query).await?;

    Ok(Json(ApiResponse::success(transactions)))
}

/// 封禁或解封用户
async fn toggle_user_status(
    State(app_state): State<Arc<AppState>>,
    admin: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<Account>>> {
    let account = app_state
        .admin_service
        .toggle_user_status(&admin.id, &username)
        .await?;

    Ok(Json(ApiResponse::success(account)))
}

async fn delete_user(
    State(app_state): State<Arc<AppState>>,
    admin: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    app_state.admin_service.delete_user(&admin.id, &username).await?;

    Ok(Json(ApiResponse::success_with_message((), "User deleted".to_string())))
}

async fn delete_publication(
    State(app_state): State<Arc<AppState>>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    app_state.admin_service.delete_publication(&admin.id, &id).await?;

    Ok(Json(ApiResponse::success_with_message((), "Publication deleted".to_string())))
}

async fn delete_comment(
    State(app_state): State<Arc<AppState>>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    app_state.admin_service.delete_comment(&admin.id, &id).await?;

    Ok(Json(ApiResponse::success_with_message((), "Comment deleted".to_string())))
}

/// 周期报表，默认按月
async fn get_report(
    State(app_state): State<Arc<AppState>>,
    Path(report): Path<ReportKind>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ApiResponse<Report>>> {
    let period = query.period.unwrap_or(ReportPeriod::Monthly);
    let report = app_state.admin_service.report(report, period).await?;

    Ok(Json(ApiResponse::success(report)))
}

/// 在线连接统计
async fn get_realtime_stats(State(app_state): State<Arc<AppState>>) -> Json<ApiResponse<RealtimeStats>> {
    Json(ApiResponse::success(app_state.websocket_service.stats()))
}
