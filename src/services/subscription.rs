use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        subscription::*,
        user::{Role, User},
    },
    services::{
        database::{Database, PaginatedResult},
        user::UserService,
    },
    store::{Condition, Query},
    utils::serde_helpers::format_timestamp,
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

pub const SUBSCRIPTION_TABLE: &str = "subscription";
pub const TRANSACTION_TABLE: &str = "transaction";

const PAYMENT_METHOD: &str = "PayPal";

/// 会员订阅与支付流水
#[derive(Clone)]
pub struct SubscriptionService {
    db: Arc<Database>,
    config: Config,
    user_service: UserService,
}

impl SubscriptionService {
    pub async fn new(db: Arc<Database>, config: &Config, user_service: UserService) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
            user_service,
        })
    }

    /// 计划目录
    pub fn plans(&self) -> Vec<PlanInfo> {
        Plan::ALL
            .iter()
            .map(|plan| PlanInfo {
                plan: *plan,
                name: plan.name().to_string(),
                product_id: self.config.premium_product_id.clone(),
                price: plan.price(),
                currency: self.config.premium_currency.clone(),
                period_days: plan.period().num_days(),
                trial_days: TRIAL_DAYS,
            })
            .collect()
    }

    pub async fn active_for(&self, user_id: &str) -> Result<Option<Subscription>> {
        self.db
            .find_one(
                Query::table(SUBSCRIPTION_TABLE)
                    .eq("user", user_id)
                    .eq("is_active", true)
                    .sort_desc("created_at"),
            )
            .await
    }

    /// 开通会员；返回更新后的用户以便重新签发令牌
    pub async fn subscribe(&self, user_id: &str, request: SubscribeRequest) -> Result<(Subscription, User)> {
        debug!("User {} subscribing to {:?}", user_id, request.plan);
        request.validate().map_err(AppError::ValidatorError)?;

        let user = self.user_service.require_active(user_id).await?;
        if self.active_for(user_id).await?.is_some() {
            return Err(AppError::conflict("You already have an active subscription"));
        }

        let now = Utc::now();
        let plan = request.plan;
        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            user: user.id.clone(),
            plan,
            price: plan.price(),
            currency: self.config.premium_currency.clone(),
            start_date: now,
            end_date: now + plan.period(),
            trial_end: now + Duration::days(TRIAL_DAYS),
            is_active: true,
            external_reference: request.external_reference.clone(),
            canceled_at: None,
            created_at: now,
        };
        let subscription = self.db.create(SUBSCRIPTION_TABLE, subscription).await?;

        self.record_transaction(&subscription, request.external_reference).await?;

        let role = if user.role == Role::Admin { Role::Admin } else { Role::UserPremium };
        let user = self
            .user_service
            .set_role(&user.id, role, Some(&subscription.id))
            .await?;

        info!("User {} subscribed to {:?} ({})", user.id, plan, subscription.id);
        Ok((subscription, user))
    }

    /// 续期一个周期；已过期的部分不补
    pub async fn renew(&self, user_id: &str, request: RenewRequest) -> Result<Subscription> {
        request.validate().map_err(AppError::ValidatorError)?;

        let subscription = self
            .active_for(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Active subscription"))?;

        let base = subscription.end_date.max(Utc::now());
        let end_date = base + subscription.plan.period();
        let subscription: Subscription = self
            .db
            .update_by_id_with_json(
                SUBSCRIPTION_TABLE,
                &subscription.id,
                json!({ "end_date": format_timestamp(&end_date) }),
            )
            .await?
            .ok_or_else(|| AppError::not_found("Subscription"))?;

        self.record_transaction(&subscription, request.external_reference).await?;
        info!("Subscription {} renewed until {}", subscription.id, end_date);
        Ok(subscription)
    }

    /// 取消订阅并降级
    pub async fn cancel(&self, user_id: &str) -> Result<User> {
        let subscription = self
            .active_for(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Active subscription"))?;

        let user = self.deactivate(&subscription).await?;
        info!("User {} canceled subscription {}", user_id, subscription.id);
        Ok(user)
    }

    async fn deactivate(&self, subscription: &Subscription) -> Result<User> {
        let now = format_timestamp(&Utc::now());
        self.db
            .update_by_id_with_json::<Subscription>(
                SUBSCRIPTION_TABLE,
                &subscription.id,
                json!({ "is_active": false, "end_date": now, "canceled_at": now }),
            )
            .await?;

        let user = self.user_service.require_active(&subscription.user).await?;
        let role = if user.role == Role::Admin { Role::Admin } else { Role::User };
        self.user_service.set_role(&user.id, role, None).await
    }

    pub async fn status(&self, user_id: &str) -> Result<SubscriptionStatusView> {
        let user = self.user_service.require_active(user_id).await?;
        let subscription = self.active_for(user_id).await?;
        let in_trial = subscription
            .as_ref()
            .map(|s| s.trial_end > Utc::now())
            .unwrap_or(false);

        Ok(SubscriptionStatusView {
            is_premium: user.role.is_premium(),
            in_trial,
            subscription,
        })
    }

    pub async fn transactions(
        &self,
        user_id: &str,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<PaginatedResult<Transaction>> {
        let (page, limit) = self.config.page_params(page, limit);
        self.db
            .paginate(
                Query::table(TRANSACTION_TABLE)
                    .eq("user", user_id)
                    .sort_desc("created_at"),
                page,
                limit,
            )
            .await
    }

    async fn record_transaction(
        &self,
        subscription: &Subscription,
        external_reference: Option<String>,
    ) -> Result<Transaction> {
        let transaction = Transaction {
            id: Uuid::new_v4().to_string(),
            user: subscription.user.clone(),
            subscription: Some(subscription.id.clone()),
            amount: subscription.price,
            currency: subscription.currency.clone(),
            status: TransactionStatus::Completed,
            payment_method: PAYMENT_METHOD.to_string(),
            external_reference,
            created_at: Utc::now(),
        };
        self.db.create(TRANSACTION_TABLE, transaction).await
    }

    /// 结束已到期的订阅，返回处理数量
    pub async fn expire_due(&self) -> Result<usize> {
        let due: Vec<Subscription> = self
            .db
            .find(
                &Query::table(SUBSCRIPTION_TABLE)
                    .eq("is_active", true)
                    .filter(Condition::before("end_date", Utc::now())),
            )
            .await?;

        let mut expired = 0;
        for subscription in &due {
            match self.deactivate(subscription).await {
                Ok(_) => expired += 1,
                Err(e) => warn!("Failed to expire subscription {}: {}", subscription.id, e),
            }
        }
        if expired > 0 {
            info!("Expired {} subscriptions", expired);
        }
        Ok(expired)
    }

    /// 后台定期清理到期订阅
    pub fn spawn_expiry_sweep(&self, every: std::time::Duration) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = service.expire_due().await {
                    error!("Subscription expiry sweep failed: {}", e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::RegisterRequest;
    use crate::services::{auth::AuthService, email::EmailService, notification::NotificationService};
    use crate::store::MemoryStore;

    async fn setup() -> (SubscriptionService, UserService, User) {
        let config = Config::default();
        let db = Arc::new(Database::with_store(Arc::new(MemoryStore::new()), &config));
        let auth = AuthService::new(&config).await.unwrap();
        let email = EmailService::new(&config).await.unwrap();
        let notifications = NotificationService::new(db.clone(), &config).await.unwrap();
        let users = UserService::new(db.clone(), &config, auth, email, notifications)
            .await
            .unwrap();
        let user = users
            .register(RegisterRequest {
                full_name: "Paying Customer".into(),
                username: Some("payer".into()),
                email: "payer@example.com".into(),
                password: "password1".into(),
                confirm_password: "password1".into(),
                interests: Vec::new(),
                bio: None,
            })
            .await
            .unwrap();
        let subscriptions = SubscriptionService::new(db, &config, users.clone()).await.unwrap();
        (subscriptions, users, user)
    }

    fn monthly() -> SubscribeRequest {
        SubscribeRequest {
            plan: Plan::Monthly,
            external_reference: Some("PAYID-1".into()),
        }
    }

    #[tokio::test]
    async fn subscribing_promotes_and_records_a_transaction() {
        let (subscriptions, _, user) = setup().await;

        let (subscription, user) = subscriptions.subscribe(&user.id, monthly()).await.unwrap();
        assert_eq!(user.role, Role::UserPremium);
        assert_eq!(user.subscription.as_deref(), Some(subscription.id.as_str()));
        assert_eq!(subscription.price, 500);

        let status = subscriptions.status(&user.id).await.unwrap();
        assert!(status.is_premium);
        assert!(status.in_trial);

        let history = subscriptions.transactions(&user.id, None, None).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.data[0].status, TransactionStatus::Completed);
        assert_eq!(history.data[0].payment_method, "PayPal");

        assert!(matches!(
            subscriptions.subscribe(&user.id, monthly()).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn renew_extends_by_one_period() {
        let (subscriptions, _, user) = setup().await;
        subscriptions.subscribe(&user.id, monthly()).await.unwrap();
        let subscription = subscriptions.active_for(&user.id).await.unwrap().unwrap();

        let renewed = subscriptions.renew(&user.id, RenewRequest::default()).await.unwrap();
        assert_eq!(
            (renewed.end_date - subscription.end_date).num_days(),
            Plan::Monthly.period().num_days()
        );
        assert_eq!(subscriptions.transactions(&user.id, None, None).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn cancel_and_expiry_demote_the_user() {
        let (subscriptions, users, user) = setup().await;
        subscriptions.subscribe(&user.id, monthly()).await.unwrap();

        let user = subscriptions.cancel(&user.id).await.unwrap();
        assert_eq!(user.role, Role::User);
        assert!(user.subscription.is_none());
        assert!(matches!(subscriptions.cancel(&user.id).await, Err(AppError::NotFound(_))));

        let (subscription, _) = subscriptions.subscribe(&user.id, monthly()).await.unwrap();
        let past = format_timestamp(&(Utc::now() - Duration::days(1)));
        subscriptions
            .db
            .update_by_id_with_json::<Subscription>(SUBSCRIPTION_TABLE, &subscription.id, json!({ "end_date": past }))
            .await
            .unwrap();

        assert_eq!(subscriptions.expire_due().await.unwrap(), 1);
        assert_eq!(users.require_active(&user.id).await.unwrap().role, Role::User);
        assert!(subscriptions.active_for(&user.id).await.unwrap().is_none());
    }
}
