use crate::{
    config::Config,
    error::{AppError, Result},
    models::notification::FanOutAction,
    models::user::*,
    services::{
        auth::{AuthService, TokenKind},
        database::Database,
        email::EmailService,
        notification::NotificationService,
    },
    store::{Condition, FieldOp, Query},
    utils::validation::default_username,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

pub const USER_TABLE: &str = "user";

const SUGGESTION_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct FollowToggle {
    pub following: bool,
    pub followers_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockToggle {
    pub blocked: bool,
}

/// 对方拉黑了行为人时拒绝任何会写入或通知对方的操作
pub fn ensure_not_blocked_by(target: &User, actor_id: &str) -> Result<()> {
    if target.has_blocked(actor_id) {
        Err(AppError::forbidden("You have been blocked by this user"))
    } else {
        Ok(())
    }
}

/// 用户服务，处理账户、资料与关系
#[derive(Clone)]
pub struct UserService {
    db: Arc<Database>,
    config: Config,
    auth_service: AuthService,
    email_service: EmailService,
    notification_service: NotificationService,
}

impl UserService {
    pub async fn new(
        db: Arc<Database>,
        config: &Config,
        auth_service: AuthService,
        email_service: EmailService,
        notification_service: NotificationService,
    ) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
            auth_service,
            email_service,
            notification_service,
        })
    }

    /// 注册新用户
    pub async fn register(&self, request: RegisterRequest) -> Result<User> {
        debug!("Registering user with email: {}", request.email);
        request.validate().map_err(AppError::ValidatorError)?;

        let email = request.email.trim().to_lowercase();
        if self.find_by_email(&email).await?.is_some() {
            return Err(AppError::conflict("Email is already registered"));
        }

        let username = match request.username {
            Some(username) => {
                if self.find_by_username(&username).await?.is_some() {
                    return Err(AppError::conflict("Username is already taken"));
                }
                username
            }
            None => self.generate_username(&request.full_name).await?,
        };

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            full_name: request.full_name.trim().to_string(),
            username,
            email,
            password_hash: self.auth_service.hash_password(&request.password)?,
            role: Role::User,
            status: UserStatus::Active,
            interests: request.interests,
            profile_picture: None,
            bio: request.bio,
            followers: Vec::new(),
            following: Vec::new(),
            blocked_users: Vec::new(),
            subscription: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        };

        let user = self.db.create(USER_TABLE, user).await?;
        info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    async fn generate_username(&self, full_name: &str) -> Result<String> {
        for _ in 0..20 {
            let candidate = default_username(full_name);
            if self.find_by_username(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        // 随机位耗尽后退回到带短 UUID 的用户名
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!("user{}", &suffix[..12]))
    }

    /// 登录校验
    pub async fn login(&self, request: LoginRequest) -> Result<User> {
        request.validate().map_err(AppError::ValidatorError)?;

        let user = self
            .find_by_email(&request.email.trim().to_lowercase())
            .await?
            .ok_or_else(|| AppError::bad_request("Invalid email or password"))?;

        if !self.auth_service.verify_password(&request.password, &user.password_hash)? {
            warn!("Failed login attempt for user {}", user.id);
            return Err(AppError::bad_request("Invalid email or password"));
        }
        if user.deleted {
            return Err(AppError::forbidden("This account has been deleted"));
        }
        if user.status == UserStatus::Blocked {
            return Err(AppError::forbidden("This account has been blocked"));
        }

        info!("User {} logged in", user.id);
        Ok(user)
    }

    /// 发送重置密码链接；邮箱不存在时同样返回成功
    pub async fn forgot_password(&self, request: ForgotPasswordRequest) -> Result<()> {
        request.validate().map_err(AppError::ValidatorError)?;

        let Some(user) = self.find_by_email(&request.email.trim().to_lowercase()).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };
        if !user.is_reachable() {
            return Ok(());
        }

        let token = self.auth_service.issue_token(&user.id, user.role, TokenKind::Reset)?;
        let link = format!("{}/reset-password/{}", self.config.frontend_url, token);
        let body = format!(
            "Hi {},\n\nUse the link below to choose a new password. It expires in one hour.\n\n{}\n",
            user.full_name, link
        );

        self.email_service
            .send_text(&user.email, "Reset your password", body)
            .await
    }

    pub async fn reset_password(&self, token: &str, request: ResetPasswordRequest) -> Result<()> {
        request.validate().map_err(AppError::ValidatorError)?;

        let claims = self.auth_service.verify_token(token, TokenKind::Reset)?;
        let user = self.require_active(&claims.sub).await?;

        let password_hash = self.auth_service.hash_password(&request.password)?;
        self.update(&user.id, json!({ "password_hash": password_hash })).await?;
        info!("Password reset for user {}", user.id);
        Ok(())
    }

    pub async fn edit_password(&self, user_id: &str, request: EditPasswordRequest) -> Result<()> {
        request.validate().map_err(AppError::ValidatorError)?;

        let user = self.require_active(user_id).await?;
        if !self
            .auth_service
            .verify_password(&request.current_password, &user.password_hash)?
        {
            return Err(AppError::bad_request("Current password is incorrect"));
        }

        let password_hash = self.auth_service.hash_password(&request.new_password)?;
        self.update(user_id, json!({ "password_hash": password_hash })).await?;
        Ok(())
    }

    /// 获取用户（包括已删除的）
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.db.get_by_id(USER_TABLE, user_id).await
    }

    /// 获取未删除的用户
    pub async fn require_active(&self, user_id: &str) -> Result<User> {
        match self.get_user(user_id).await? {
            Some(user) if !user.deleted => Ok(user),
            _ => Err(AppError::not_found("User")),
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.db
            .find_one(Query::table(USER_TABLE).eq("username", username))
            .await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.db.find_one(Query::table(USER_TABLE).eq("email", email)).await
    }

    /// 按用户名查找未删除的用户
    pub async fn require_by_username(&self, username: &str) -> Result<User> {
        match self.find_by_username(username).await? {
            Some(user) if !user.deleted => Ok(user),
            _ => Err(AppError::not_found("User")),
        }
    }

    pub async fn view_account(&self, user_id: &str) -> Result<Account> {
        Ok(self.require_active(user_id).await?.into())
    }

    pub async fn edit_profile(&self, user_id: &str, request: EditProfileRequest) -> Result<Account> {
        debug!("Updating profile for user: {}", user_id);
        request.validate().map_err(AppError::ValidatorError)?;

        let user = self.require_active(user_id).await?;
        let mut updates = serde_json::Map::new();

        if let Some(username) = request.username {
            if username != user.username {
                if self.find_by_username(&username).await?.is_some() {
                    return Err(AppError::conflict("Username is already taken"));
                }
                updates.insert("username".into(), json!(username));
            }
        }
        if let Some(full_name) = request.full_name {
            updates.insert("full_name".into(), json!(full_name.trim()));
        }
        if let Some(bio) = request.bio {
            updates.insert("bio".into(), json!(bio));
        }
        if let Some(interests) = request.interests {
            updates.insert("interests".into(), json!(interests));
        }
        if let Some(profile_picture) = request.profile_picture {
            updates.insert("profile_picture".into(), json!(profile_picture));
        }

        if updates.is_empty() {
            return Ok(user.into());
        }
        Ok(self.update(user_id, serde_json::Value::Object(updates)).await?.into())
    }

    /// 分享个人主页链接
    pub async fn share_profile(&self, user_id: &str) -> Result<String> {
        let user = self.require_active(user_id).await?;
        Ok(format!(
            "{}/profile/{}",
            self.config.frontend_url,
            urlencoding::encode(&user.username)
        ))
    }

    /// 查看其他用户
    pub async fn view_user(&self, viewer_id: &str, username: &str) -> Result<UserProfile> {
        let target = self.require_by_username(username).await?;

        if target.status == UserStatus::Blocked && target.id != viewer_id {
            return Err(AppError::forbidden("This account has been blocked"));
        }
        ensure_not_blocked_by(&target, viewer_id)?;

        Ok(UserProfile::from(&target))
    }

    /// 关注或取消关注
    pub async fn follow_or_unfollow(&self, actor_id: &str, username: &str) -> Result<FollowToggle> {
        debug!("User {} toggling follow on {}", actor_id, username);

        let actor = self.require_active(actor_id).await?;
        let target = self.require_by_username(username).await?;

        if actor.id == target.id {
            return Err(AppError::bad_request("You cannot follow yourself"));
        }

        if actor.is_following(&target.id) {
            self.apply(&actor.id, vec![FieldOp::pull("following", target.id.as_str())])
                .await?;
            let target = self
                .apply(&target.id, vec![FieldOp::pull("followers", actor.id.as_str())])
                .await?;
            info!("User {} unfollowed {}", actor.id, target.id);
            return Ok(FollowToggle {
                following: false,
                followers_count: target.followers.len(),
            });
        }

        ensure_not_blocked_by(&target, &actor.id)?;
        if actor.has_blocked(&target.id) {
            return Err(AppError::bad_request("Unblock this user before following them"));
        }
        if !target.is_reachable() {
            return Err(AppError::forbidden("This account cannot be followed"));
        }

        self.apply(&actor.id, vec![FieldOp::add_to_set("following", target.id.as_str())])
            .await?;
        let target = self
            .apply(&target.id, vec![FieldOp::add_to_set("followers", actor.id.as_str())])
            .await?;

        let action = FanOutAction::Follower {
            actor: actor.id.clone(),
            actor_name: actor.username.clone(),
            followed: target.id.clone(),
        };
        if let Err(e) = self.notification_service.dispatch(action).await {
            // 记录错误但不中断流程
            warn!("Failed to send follow notification: {}", e);
        }

        info!("User {} followed {}", actor.id, target.id);
        Ok(FollowToggle {
            following: true,
            followers_count: target.followers.len(),
        })
    }

    /// 拉黑或取消拉黑；拉黑时双向解除关注
    pub async fn block_or_unblock(&self, actor_id: &str, username: &str) -> Result<BlockToggle> {
        let actor = self.require_active(actor_id).await?;
        let target = self.require_by_username(username).await?;

        if actor.id == target.id {
            return Err(AppError::bad_request("You cannot block yourself"));
        }

        if actor.has_blocked(&target.id) {
            self.apply(&actor.id, vec![FieldOp::pull("blocked_users", target.id.as_str())])
                .await?;
            info!("User {} unblocked {}", actor.id, target.id);
            return Ok(BlockToggle { blocked: false });
        }

        self.apply(
            &actor.id,
            vec![
                FieldOp::add_to_set("blocked_users", target.id.as_str()),
                FieldOp::pull("following", target.id.as_str()),
                FieldOp::pull("followers", target.id.as_str()),
            ],
        )
        .await?;
        self.apply(
            &target.id,
            vec![
                FieldOp::pull("following", actor.id.as_str()),
                FieldOp::pull("followers", actor.id.as_str()),
            ],
        )
        .await?;

        info!("User {} blocked {}", actor.id, target.id);
        Ok(BlockToggle { blocked: true })
    }

    /// 举报用户
    pub async fn report_user(&self, actor_id: &str, username: &str) -> Result<()> {
        let target = self.require_by_username(username).await?;

        if target.id == actor_id {
            return Err(AppError::bad_request("You cannot report yourself"));
        }
        match target.status {
            UserStatus::Reported => return Err(AppError::bad_request("User has already been reported")),
            UserStatus::Blocked => return Err(AppError::bad_request("User is already blocked")),
            UserStatus::Active => {}
        }

        self.update(&target.id, json!({ "status": UserStatus::Reported })).await?;
        info!("User {} reported {}", actor_id, target.id);
        Ok(())
    }

    /// 推荐关注：未关注、未互相拉黑的活跃用户
    pub async fn suggestions(&self, user_id: &str) -> Result<Vec<UserProfile>> {
        let user = self.require_active(user_id).await?;

        let mut excluded = user.following.clone();
        excluded.extend(user.blocked_users.iter().cloned());
        excluded.push(user.id.clone());

        let candidates: Vec<User> = self
            .db
            .find(
                &Query::table(USER_TABLE)
                    .not_deleted()
                    .eq("status", UserStatus::Active.as_str())
                    .filter(Condition::not_in("id", excluded))
                    .sort_desc("created_at")
                    .limit(SUGGESTION_LIMIT * 4),
            )
            .await?;

        Ok(candidates
            .iter()
            .filter(|candidate| !candidate.has_blocked(&user.id))
            .take(SUGGESTION_LIMIT)
            .map(UserProfile::from)
            .collect())
    }

    /// 角色变更（会员订阅与取消）
    pub async fn set_role(&self, user_id: &str, role: Role, subscription: Option<&str>) -> Result<User> {
        self.update(user_id, json!({ "role": role, "subscription": subscription }))
            .await
    }

    pub(crate) async fn update(&self, user_id: &str, updates: serde_json::Value) -> Result<User> {
        self.db
            .touch_by_id(USER_TABLE, user_id, updates)
            .await?
            .ok_or_else(|| AppError::not_found("User"))
    }

    /// 关注与拉黑列表只通过原子操作修改，并发请求不会互相覆盖
    async fn apply(&self, user_id: &str, ops: Vec<FieldOp>) -> Result<User> {
        self.db
            .apply_ops(USER_TABLE, user_id, ops)
            .await?
            .ok_or_else(|| AppError::not_found("User"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification::NOTIFICATION_TABLE;
    use crate::store::{testing::SlowStore, DocumentStore, MemoryStore};
    use std::time::Duration;

    async fn setup() -> (UserService, Arc<Database>) {
        setup_with(Arc::new(MemoryStore::new())).await
    }

    async fn setup_with(store: Arc<dyn DocumentStore>) -> (UserService, Arc<Database>) {
        let config = Config::default();
        let db = Arc::new(Database::with_store(store, &config));
        let auth = AuthService::new(&config).await.unwrap();
        let email = EmailService::new(&config).await.unwrap();
        let notifications = NotificationService::new(db.clone(), &config).await.unwrap();
        let service = UserService::new(db.clone(), &config, auth, email, notifications)
            .await
            .unwrap();
        (service, db)
    }

    fn registration(name: &str) -> RegisterRequest {
        RegisterRequest {
            full_name: format!("{} Tester", name),
            username: Some(name.to_string()),
            email: format!("{}@example.com", name),
            password: "password1".into(),
            confirm_password: "password1".into(),
            interests: vec!["music".into()],
            bio: None,
        }
    }

    async fn notification_count(db: &Database) -> usize {
        db.count(&Query::table(NOTIFICATION_TABLE)).await.unwrap()
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_generates_usernames() {
        let (service, _) = setup().await;
        service.register(registration("alice")).await.unwrap();

        let duplicate = service.register(registration("alice")).await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));

        let mut request = registration("bob");
        request.username = None;
        let bob = service.register(request).await.unwrap();
        assert!(bob.username.starts_with("bobtester"));
    }

    #[tokio::test]
    async fn login_checks_password_and_status() {
        let (service, _) = setup().await;
        let alice = service.register(registration("alice")).await.unwrap();

        let wrong = service
            .login(LoginRequest { email: "alice@example.com".into(), password: "nope".into() })
            .await;
        assert!(matches!(wrong, Err(AppError::BadRequest(_))));

        service.update(&alice.id, json!({ "status": "blocked" })).await.unwrap();
        let blocked = service
            .login(LoginRequest { email: "alice@example.com".into(), password: "password1".into() })
            .await;
        assert!(matches!(blocked, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn follow_toggles_and_notifies_once() {
        let (service, db) = setup().await;
        let alice = service.register(registration("alice")).await.unwrap();
        let bob = service.register(registration("bob")).await.unwrap();

        let toggle = service.follow_or_unfollow(&alice.id, "bob").await.unwrap();
        assert!(toggle.following);
        assert_eq!(toggle.followers_count, 1);
        assert_eq!(notification_count(&db).await, 1);
        assert!(service.require_active(&alice.id).await.unwrap().is_following(&bob.id));

        let toggle = service.follow_or_unfollow(&alice.id, "bob").await.unwrap();
        assert!(!toggle.following);
        assert_eq!(toggle.followers_count, 0);
        assert_eq!(notification_count(&db).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_follows_keep_every_follower() {
        let store = SlowStore::new(MemoryStore::new(), Duration::from_millis(2));
        let (service, db) = setup_with(Arc::new(store)).await;
        let target = service.register(registration("target")).await.unwrap();

        let mut fans = Vec::new();
        for i in 0..40 {
            fans.push(service.register(registration(&format!("fan{}", i))).await.unwrap().id);
        }

        let handles: Vec<_> = fans
            .iter()
            .map(|fan| {
                let service = service.clone();
                let fan = fan.clone();
                tokio::spawn(async move { service.follow_or_unfollow(&fan, "target").await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().following);
        }

        let target = service.require_active(&target.id).await.unwrap();
        assert_eq!(target.followers.len(), 40);
        for fan in &fans {
            assert!(target.followers.contains(fan));
        }
        assert_eq!(notification_count(&db).await, 40);
    }

    #[tokio::test]
    async fn blocked_users_cannot_follow_or_view() {
        let (service, db) = setup().await;
        let alice = service.register(registration("alice")).await.unwrap();
        let bob = service.register(registration("bob")).await.unwrap();

        service.follow_or_unfollow(&alice.id, "bob").await.unwrap();
        let before = notification_count(&db).await;

        assert!(service.block_or_unblock(&bob.id, "alice").await.unwrap().blocked);
        let alice_now = service.require_active(&alice.id).await.unwrap();
        assert!(!alice_now.is_following(&bob.id));

        let follow = service.follow_or_unfollow(&alice.id, "bob").await;
        assert!(matches!(follow, Err(AppError::Authorization(_))));
        assert!(matches!(service.view_user(&alice.id, "bob").await, Err(AppError::Authorization(_))));
        assert_eq!(notification_count(&db).await, before);
        assert!(service.require_active(&bob.id).await.unwrap().followers.is_empty());

        assert!(!service.block_or_unblock(&bob.id, "alice").await.unwrap().blocked);
        assert!(service.follow_or_unfollow(&alice.id, "bob").await.unwrap().following);
    }

    #[tokio::test]
    async fn suggestions_skip_followed_blocked_and_deleted_users() {
        let (service, _) = setup().await;
        let alice = service.register(registration("alice")).await.unwrap();
        for name in ["bob", "carol", "dave", "erin"] {
            service.register(registration(name)).await.unwrap();
        }
        service.follow_or_unfollow(&alice.id, "bob").await.unwrap();
        let carol = service.require_by_username("carol").await.unwrap();
        service.block_or_unblock(&carol.id, "alice").await.unwrap();
        let dave = service.require_by_username("dave").await.unwrap();
        service.update(&dave.id, json!({ "deleted": true })).await.unwrap();

        let names: Vec<String> = service
            .suggestions(&alice.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.username)
            .collect();
        assert_eq!(names, vec!["erin".to_string()]);
    }

    #[tokio::test]
    async fn report_marks_the_user_once() {
        let (service, _) = setup().await;
        let alice = service.register(registration("alice")).await.unwrap();
        service.register(registration("bob")).await.unwrap();

        service.report_user(&alice.id, "bob").await.unwrap();
        assert_eq!(
            service.require_by_username("bob").await.unwrap().status,
            UserStatus::Reported
        );
        assert!(service.report_user(&alice.id, "bob").await.is_err());
    }
}
