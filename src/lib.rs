use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

use crate::{
    config::Config,
    services::Database,
    state::AppState,
    utils::middleware::{rate_limit_middleware, request_id_middleware, request_logging_middleware},
};

/// 连接数据库并初始化所有服务
pub async fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let db = Database::new(&config).await?;
    db.verify_connection().await?;
    info!("Database connection established successfully");

    let state = AppState::new(config, Arc::new(db)).await?;
    Ok(Arc::new(state))
}

/// 组装全部路由与中间件
pub fn build_router(state: Arc<AppState>) -> Router {
    let origins = state
        .config
        .cors_allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect::<Vec<_>>();

    // 会话在 Cookie 中，必须显式列出来源与请求头
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, ACCEPT])
        .allow_credentials(true)
        .allow_origin(origins);

    let api = Router::new()
        .nest("/users", routes::users::router(state.clone()))
        .nest("/publications", routes::publications::router(state.clone()))
        .nest("/feed", routes::feed::router(state.clone()))
        .nest("/search", routes::search::router(state.clone()))
        .nest("/notifications", routes::notifications::router(state.clone()))
        .nest("/messages", routes::messages::router(state.clone()))
        .nest("/socket", routes::socket::router(state.clone()))
        .nest("/subscriptions", routes::subscriptions::router(state.clone()))
        .nest("/admin", routes::admin::router(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(state.clone(), request_logging_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "Kirtily is running!"
}
