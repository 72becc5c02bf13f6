use crate::{
    error::{AppError, Result},
    models::user::*,
    routes::paginated,
    services::auth::{AuthUser, TokenKind, REFRESH_COOKIE},
    state::AppState,
    utils::middleware::auth_middleware,
};
use axum::{
    extract::{Path, Query, State},
    headers::{Cookie, HeaderMapExt},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    middleware,
    response::{AppendHeaders, IntoResponse, Json},
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // 公开路由
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password/:token", post(reset_password));

    // 需要认证的路由
    Router::new()
        .route("/account", get(view_account))
        .route("/profile", get(view_profile).patch(edit_profile))
        .route("/profile/share", get(share_profile))
        .route("/password", patch(edit_password))
        .route("/suggestions", get(suggestions))
        .route("/:username", get(view_user))
        .route("/:username/follow", post(follow_or_unfollow))
        .route("/:username/block", post(block_or_unblock))
        .route("/:username/report", post(report_user))
        .route("/:username/publications", get(user_publications))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
        .merge(public)
}

#[derive(Debug, Deserialize)]
pub struct UserPublicationsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// 注册新用户
/// POST /api/users/register
pub async fn register(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    debug!("Registering user with email: {}", request.email);

    let user = app_state.user_service.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": Account::from(user),
            "message": "Account created successfully"
        })),
    ))
}

/// 登录并写入会话 Cookie
/// POST /api/users/login
pub async fn login(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let user = app_state.user_service.login(request).await?;
    let tokens = app_state.auth_service.issue_session(&user.id, user.role)?;
    let [access, refresh] = app_state.auth_service.session_cookies(&tokens);

    info!("User {} logged in", user.id);
    Ok((
        AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]),
        Json(json!({
            "success": true,
            "data": Account::from(user)
        })),
    ))
}

/// 退出登录
/// POST /api/users/logout
pub async fn logout(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    let [access, refresh] = app_state.auth_service.cleared_cookies();
    (
        AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]),
        Json(json!({
            "success": true,
            "message": "Logged out"
        })),
    )
}

/// 使用刷新令牌换取新的访问令牌，角色从数据库重新读取
/// POST /api/users/refresh
pub async fn refresh(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let token = headers
        .typed_get::<Cookie>()
        .and_then(|cookies| cookies.get(REFRESH_COOKIE).map(|t| t.to_string()))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("Refresh token missing"))?;
    let claims = app_state.auth_service.verify_token(&token, TokenKind::Refresh)?;

    let user = app_state
        .user_service
        .require_active(&claims.sub)
        .await
        .map_err(|_| AppError::unauthorized("Account no longer exists"))?;
    if !user.is_reachable() {
        return Err(AppError::forbidden("This account has been blocked"));
    }

    let access_token = app_state
        .auth_service
        .issue_token(&user.id, user.role, TokenKind::Access)?;
    let cookie = app_state.auth_service.access_cookie(&access_token);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(json!({
            "success": true,
            "data": { "role": user.role }
        })),
    ))
}

/// 发送重置密码邮件，未知邮箱同样返回成功
/// POST /api/users/forgot-password
pub async fn forgot_password(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>> {
    app_state.user_service.forgot_password(request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "If the email exists, a reset link has been sent"
    })))
}

/// POST /api/users/reset-password/:token
pub async fn reset_password(
    State(app_state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<Value>> {
    app_state.user_service.reset_password(&token, request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password updated"
    })))
}

/// 当前账户
/// GET /api/users/account
pub async fn view_account(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let account = app_state.user_service.view_account(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": account
    })))
}

/// 当前用户的公开资料
/// GET /api/users/profile
pub async fn view_profile(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let profile = app_state.user_service.require_active(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": UserProfile::from(&profile)
    })))
}

/// PATCH /api/users/profile
pub async fn edit_profile(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<EditProfileRequest>,
) -> Result<Json<Value>> {
    let account = app_state.user_service.edit_profile(&user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": account
    })))
}

/// PATCH /api/users/password
pub async fn edit_password(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<EditPasswordRequest>,
) -> Result<Json<Value>> {
    app_state.user_service.edit_password(&user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password updated"
    })))
}

/// GET /api/users/profile/share
pub async fn share_profile(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let link = app_state.user_service.share_profile(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "link": link }
    })))
}

/// 推荐关注
/// GET /api/users/suggestions
pub async fn suggestions(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let users = app_state.user_service.suggestions(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": users
    })))
}

/// 查看其他用户
/// GET /api/users/:username
pub async fn view_user(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    debug!("User {} viewing profile {}", user.id, username);

    let profile = app_state.user_service.view_user(&user.id, &username).await?;

    Ok(Json(json!({
        "success": true,
        "data": profile
    })))
}

/// 关注或取消关注
/// POST /api/users/:username/follow
pub async fn follow_or_unfollow(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    let toggle = app_state.user_service.follow_or_unfollow(&user.id, &username).await?;

    Ok(Json(json!({
        "success": true,
        "data": toggle
    })))
}

/// 拉黑或取消拉黑
/// POST /api/users/:username/block
pub async fn block_or_unblock(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    let toggle = app_state.user_service.block_or_unblock(&user.id, &username).await?;

    Ok(Json(json!({
        "success": true,
        "data": toggle
    })))
}

/// POST /api/users/:username/report
pub async fn report_user(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    app_state.user_service.report_user(&user.id, &username).await?;

    Ok(Json(json!({
        "success": true,
        "message": "User reported"
    })))
}

/// 某个用户的帖子
/// GET /api/users/:username/publications
pub async fn user_publications(
    State(app_state): State<Arc<AppState>>,
    user: AuthUser,
    Path(username): Path<String>,
    Query(query): Query<UserPublicationsQuery>,
) -> Result<Json<Value>> {
    let result = app_state
        .publication_service
        .by_author(&user.id, &username, query.page, query.limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": paginated("publications", result)
    })))
}
