use axum::{
    extract::{Query, State},
    http::header::SET_COOKIE,
    middleware,
    response::{AppendHeaders, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{
    error::Result,
    models::{
        response::ApiResponse,
        subscription::*,
        user::User,
    },
    services::{
        auth::{AuthUser, TokenKind},
        database::PaginatedResult,
    },
    state::AppState,
    utils::middleware::auth_middleware,
};

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route(
            "/",
            get(get_subscription_status)
                .post(create_subscription)
                .delete(cancel_subscription),
        )
        .route("/renew", post(renew_subscription))
        .route("/transactions", get(get_transactions))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/plans", get(get_plans))
        .merge(protected)
}

/// 角色变化后重新签发访问令牌
fn role_cookie(app_state: &AppState, user: &User) -> Result<String> {
    let token = app_state
        .auth_service
        .issue_token(&user.id, user.role, TokenKind::Access)?;
    Ok(app_state.auth_service.access_cookie(&token))
}

/// 会员计划目录
async fn get_plans(State(app_state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<PlanInfo>>> {
    Json(ApiResponse::success(app_state.subscription_service.plans()))
}

/// 当前订阅状态
async fn get_subscription_status(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ApiResponse<SubscriptionStatusView>>> {
    let status = app_state.subscription_service.status(&user.id).await?;

    Ok(Json(ApiResponse::success(status)))
}

/// 开通会员
async fn create_subscription(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse> {
    let (subscription, user) = app_state
        .subscription_service
        .subscribe(&user.id, request)
        .await?;
    let cookie = role_cookie(&app_state, &user)?;

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(ApiResponse::success_with_message(
            subscription,
            "Subscription activated".to_string(),
        )),
    ))
}

/// 续期
async fn renew_subscription(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<RenewRequest>,
) -> Result<Json<ApiResponse<Subscription>>> {
    let subscription = app_state
        .subscription_service
        .renew(&user.id, request)
        .await?;

    Ok(Json(ApiResponse::success(subscription)))
}

/// 取消订阅
async fn cancel_subscription(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let user = app_state.subscription_service.cancel(&user.id).await?;
    let cookie = role_cookie(&app_state, &user)?;

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(ApiResponse::success_with_message(
            user.role,
            "Subscription canceled".to_string(),
        )),
    ))
}

/// 支付流水
async fn get_transactions(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Transaction>>>> {
    let transactions = app_state
        .subscription_service
        .transactions(&user.id, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(transactions)))
}
