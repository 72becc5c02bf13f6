use crate::{
    config::Config,
    error::{AppError, Result},
    services::{
        admin::AdminService,
        auth::AuthService,
        comment::CommentService,
        database::Database,
        email::EmailService,
        message::MessageService,
        notification::NotificationService,
        publication::PublicationService,
        search::SearchService,
        subscription::SubscriptionService,
        user::UserService,
        websocket::WebSocketService,
    },
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::debug;

pub type KeyedRateLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 数据库连接
    pub db: Arc<Database>,

    /// 认证服务
    pub auth_service: AuthService,

    /// 用户服务
    pub user_service: UserService,

    /// 帖子服务
    pub publication_service: PublicationService,

    /// 评论服务
    pub comment_service: CommentService,

    /// 通知服务
    pub notification_service: NotificationService,

    /// 搜索服务
    pub search_service: SearchService,

    /// 私信服务
    pub message_service: MessageService,

    /// 实时连接
    pub websocket_service: WebSocketService,

    /// 会员订阅
    pub subscription_service: SubscriptionService,

    /// 后台管理
    pub admin_service: AdminService,

    /// 按客户端 IP 限流
    pub rate_limiter: Arc<KeyedRateLimiter>,
}

impl AppState {
    /// 按依赖顺序初始化所有服务
    pub async fn new(config: Config, db: Arc<Database>) -> Result<Self> {
        let auth_service = AuthService::new(&config).await?;
        let email_service = EmailService::new(&config).await?;
        let notification_service = NotificationService::new(db.clone(), &config).await?;
        let user_service = UserService::new(
            db.clone(),
            &config,
            auth_service.clone(),
            email_service,
            notification_service.clone(),
        )
        .await?;
        let publication_service = PublicationService::new(
            db.clone(),
            &config,
            user_service.clone(),
            notification_service.clone(),
        )
        .await?;
        let comment_service = CommentService::new(
            db.clone(),
            user_service.clone(),
            publication_service.clone(),
            notification_service.clone(),
        )
        .await?;
        let search_service = SearchService::new(db.clone(), &config).await?;
        let websocket_service = WebSocketService::new().await?;
        let message_service = MessageService::new(
            db.clone(),
            &config,
            user_service.clone(),
            notification_service.clone(),
            websocket_service.clone(),
        )
        .await?;
        let subscription_service = SubscriptionService::new(db.clone(), &config, user_service.clone()).await?;
        let admin_service = AdminService::new(
            db.clone(),
            &config,
            user_service.clone(),
            publication_service.clone(),
            comment_service.clone(),
        )
        .await?;

        let per_minute = NonZeroU32::new(config.rate_limit_requests)
            .ok_or_else(|| AppError::Internal("RATE_LIMIT_REQUESTS must be positive".to_string()))?;
        let rate_limiter = Arc::new(RateLimiter::dashmap(Quota::per_minute(per_minute)));

        Ok(Self {
            config,
            db,
            auth_service,
            user_service,
            publication_service,
            comment_service,
            notification_service,
            search_service,
            message_service,
            websocket_service,
            subscription_service,
            admin_service,
            rate_limiter,
        })
    }

    /// 检查是否为生产环境
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// 丢弃额度已完全恢复的客户端，返回仍在跟踪的数量
    pub fn prune_rate_limits(&self) -> usize {
        self.rate_limiter.retain_recent();
        self.rate_limiter.shrink_to_fit();
        self.rate_limiter.len()
    }

    /// 定期清理限流表，避免按 IP 的键无限增长
    pub fn spawn_rate_limit_cleanup(self: &Arc<Self>, every: Duration) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let tracked = state.prune_rate_limits();
                debug!("Rate limiter is tracking {} clients", tracked);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_clients_are_pruned_from_the_rate_limiter() {
        let config = Config::default();
        let db = Arc::new(Database::new(&config).await.unwrap());
        let state = AppState::new(config, db).await.unwrap();

        for i in 0..50 {
            assert!(state.rate_limiter.check_key(&format!("10.0.0.{}", i)).is_ok());
        }
        assert_eq!(state.rate_limiter.len(), 50);

        // 1000 次/分钟时单次请求的额度在 60ms 内恢复
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(state.prune_rate_limits(), 0);
    }
}
