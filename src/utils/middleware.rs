use crate::{
    error::AppError,
    services::auth::{AuthUser, TokenKind, ACCESS_COOKIE},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    headers::{Cookie, HeaderMapExt},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info, warn};

/// 认证中间件
///
/// 从 `accessToken` Cookie（或 `Authorization: Bearer`）读取访问令牌，
/// 重新加载用户以拿到最新角色，并把 [`AuthUser`] 放入请求扩展。
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let token = access_token(&request)
        .ok_or_else(|| AppError::unauthorized("Authentication required"))?;
    let claims = app_state.auth_service.verify_token(&token, TokenKind::Access)?;

    let user = app_state
        .user_service
        .get_user(&claims.sub)
        .await?
        .filter(|user| !user.deleted)
        .ok_or_else(|| AppError::unauthorized("Account no longer exists"))?;
    if !user.is_reachable() {
        return Err(AppError::forbidden("This account has been blocked"));
    }

    debug!("Authenticated user: {} ({})", user.id, user.role.as_str());
    request.extensions_mut().insert(AuthUser {
        id: user.id,
        role: user.role,
    });

    Ok(next.run(request).await)
}

fn access_token(request: &Request<Body>) -> Option<String> {
    if let Some(cookies) = request.headers().typed_get::<Cookie>() {
        if let Some(token) = cookies.get(ACCESS_COOKIE).filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }
    }

    request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

/// 管理员路由守卫，需在认证中间件之后执行
pub async fn require_admin(request: Request<Body>, next: Next<Body>) -> Result<Response, AppError> {
    match request.extensions().get::<AuthUser>() {
        Some(user) if user.is_admin() => Ok(next.run(request).await),
        Some(user) => {
            warn!("User {} attempted to access an admin route", user.id);
            Err(AppError::forbidden("Administrator access required"))
        }
        None => Err(AppError::unauthorized("Authentication required")),
    }
}

/// 速率限制中间件
pub async fn rate_limit_middleware(
    State(app_state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let client_ip = get_client_ip(&request, app_state.config.trust_proxy_headers);

    match app_state.rate_limiter.check_key(&client_ip) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            warn!("Rate limit exceeded for IP: {}", client_ip);
            Err(AppError::RateLimitExceeded)
        }
    }
}

/// 请求日志中间件
pub async fn request_logging_middleware(
    State(app_state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request, app_state.config.trust_proxy_headers);

    let start_time = std::time::Instant::now();

    debug!("Incoming request: {} {} from {}", method, uri, client_ip);

    let response = next.run(request).await;

    info!(
        "Request completed: {} {} {} - {}ms",
        method,
        uri,
        response.status().as_u16(),
        start_time.elapsed().as_millis()
    );

    response
}

/// 请求 ID 中间件
pub async fn request_id_middleware(mut request: Request<Body>, next: Next<Body>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// 获取客户端 IP 地址
///
/// 代理头只有在 `trust_proxy` 开启时才采用，否则使用连接的对端地址。
fn get_client_ip(request: &Request<Body>, trust_proxy: bool) -> String {
    if trust_proxy {
        let headers = request.headers();

        if let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return ip.to_string();
        }

        if let Some(ip) = headers.get("x-real-ip").and_then(|value| value.to_str().ok()) {
            return ip.trim().to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 请求 ID 包装器
#[derive(Debug, Clone)]
pub struct RequestId(pub String);
