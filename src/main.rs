use std::net::SocketAddr;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kirtily::{build_router, build_state, config::Config};

/// 订阅到期检查间隔
const SUBSCRIPTION_SWEEP_SECS: u64 = 3600;

/// 限流表清理间隔
const RATE_LIMIT_CLEANUP_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenv::dotenv().ok();

    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "kirtily=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kirtily service...");

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;

    let app_state = build_state(config).await?;
    if app_state.is_production() {
        info!("Running in production mode");
    }

    // 启动后台任务
    app_state
        .subscription_service
        .spawn_expiry_sweep(Duration::from_secs(SUBSCRIPTION_SWEEP_SECS));
    app_state.spawn_rate_limit_cleanup(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));

    let app = build_router(app_state);

    info!("Starting server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}
